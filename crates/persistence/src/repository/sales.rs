//! Sales repository — upserts for customers, products and orders keyed by their CSV ids

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Transaction};

/// A customer row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CustomerRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub address: String,
    pub other_details: String,
}

/// A product row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    pub category: String,
}

/// An order row. Revenue is `quantity * unit_price - discount + shipping_cost`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderRecord {
    pub id: String,
    pub customer_id: String,
    pub product_id: String,
    pub region: String,
    pub date: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub discount: f64,
    pub shipping_cost: f64,
    pub payment_method: String,
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesCounts {
    pub customers: i64,
    pub products: i64,
    pub orders: i64,
}

/// Repository for the sales tables
pub struct SalesRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SalesRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a transaction; the upserts below accept `&mut *tx`
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Insert a customer, or refresh name/email/address when the id exists.
    /// `other_details` is only written on first insert.
    pub async fn upsert_customer<'e, E>(executor: E, record: &CustomerRecord) -> DbResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"INSERT INTO customers (id, name, email, address, other_details)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 address = excluded.address
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.email)
        .bind(&record.address)
        .bind(&record.other_details)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Insert a product, or refresh name/category when the id exists
    pub async fn upsert_product<'e, E>(executor: E, record: &ProductRecord) -> DbResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"INSERT INTO products (id, name, category)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 category = excluded.category
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.category)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Insert an order, or overwrite every non-key column when the id exists
    pub async fn upsert_order<'e, E>(executor: E, record: &OrderRecord) -> DbResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"INSERT INTO orders
                (id, customer_id, product_id, region, date, quantity,
                 unit_price, discount, shipping_cost, payment_method)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
               ON CONFLICT(id) DO UPDATE SET
                 customer_id = excluded.customer_id,
                 product_id = excluded.product_id,
                 region = excluded.region,
                 date = excluded.date,
                 quantity = excluded.quantity,
                 unit_price = excluded.unit_price,
                 discount = excluded.discount,
                 shipping_cost = excluded.shipping_cost,
                 payment_method = excluded.payment_method
            "#,
        )
        .bind(&record.id)
        .bind(&record.customer_id)
        .bind(&record.product_id)
        .bind(&record.region)
        .bind(&record.date)
        .bind(record.quantity)
        .bind(record.unit_price)
        .bind(record.discount)
        .bind(record.shipping_cost)
        .bind(&record.payment_method)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn get_customer(&self, id: &str) -> DbResult<Option<CustomerRecord>> {
        let record = sqlx::query_as::<_, CustomerRecord>(
            "SELECT id, name, email, address, other_details FROM customers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_product(&self, id: &str) -> DbResult<Option<ProductRecord>> {
        let record = sqlx::query_as::<_, ProductRecord>(
            "SELECT id, name, category FROM products WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_order(&self, id: &str) -> DbResult<Option<OrderRecord>> {
        let record = sqlx::query_as::<_, OrderRecord>(
            r#"
            SELECT id, customer_id, product_id, region, date, quantity,
                   unit_price, discount, shipping_cost, payment_method
            FROM orders
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Count rows in each sales table
    pub async fn counts(&self) -> DbResult<SalesCounts> {
        let customers: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM customers")
            .fetch_one(self.pool)
            .await?;
        let products: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
            .fetch_one(self.pool)
            .await?;
        let orders: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders")
            .fetch_one(self.pool)
            .await?;

        Ok(SalesCounts {
            customers: customers.0,
            products: products.0,
            orders: orders.0,
        })
    }
}
