//! Database schema definitions

/// SQL to create all tables
/// NOTE: `orders.date` is kept as the raw CSV text; range filters compare it lexically
pub const CREATE_TABLES: &str = r#"
-- Customers, keyed by the CSV "Customer ID"
CREATE TABLE IF NOT EXISTS customers (
    id TEXT PRIMARY KEY,
    name TEXT,
    email TEXT,
    address TEXT,
    other_details TEXT
);

-- Products, keyed by the CSV "Product ID"
CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    name TEXT,
    category TEXT
);

-- Orders, keyed by the CSV "Order ID"
CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    customer_id TEXT REFERENCES customers(id),
    product_id TEXT REFERENCES products(id),
    region TEXT,
    date TEXT,
    quantity INTEGER,
    unit_price REAL,
    discount REAL,
    shipping_cost REAL,
    payment_method TEXT
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_orders_date ON orders(date);
CREATE INDEX IF NOT EXISTS idx_orders_product ON orders(product_id);
CREATE INDEX IF NOT EXISTS idx_orders_region ON orders(region);
CREATE INDEX IF NOT EXISTS idx_products_category ON products(category)
"#;
