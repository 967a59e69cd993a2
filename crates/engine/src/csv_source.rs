//! CSV source — header resolution and per-row type coercion
//!
//! String columns are copied verbatim. Numeric columns are trimmed and parsed;
//! a row with any empty or unparseable numeric field is skipped.

use crate::ingest::IngestError;
use persistence::repository::{CustomerRecord, OrderRecord, ProductRecord};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use tracing::debug;

// ---------------------------------------------------------------------------
// Column names
// ---------------------------------------------------------------------------

pub const ORDER_ID: &str = "Order ID";
pub const CUSTOMER_ID: &str = "Customer ID";
pub const CUSTOMER_NAME: &str = "Customer Name";
pub const CUSTOMER_EMAIL: &str = "Customer Email";
pub const CUSTOMER_ADDRESS: &str = "Customer Address";
pub const PRODUCT_ID: &str = "Product ID";
pub const PRODUCT_NAME: &str = "Product Name";
pub const CATEGORY: &str = "Category";
pub const REGION: &str = "Region";
pub const DATE_OF_SALE: &str = "Date of Sale";
pub const QUANTITY_SOLD: &str = "Quantity Sold";
pub const UNIT_PRICE: &str = "Unit Price";
pub const DISCOUNT: &str = "Discount";
pub const SHIPPING_COST: &str = "Shipping Cost";
pub const PAYMENT_METHOD: &str = "Payment Method";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One accepted CSV row, numeric fields already coerced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleRow {
    pub order_id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_address: String,
    pub product_id: String,
    pub product_name: String,
    pub category: String,
    pub region: String,
    pub date: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub shipping_cost: Decimal,
    pub payment_method: String,
}

impl SaleRow {
    /// `quantity * unit_price - discount + shipping_cost`, `None` if it
    /// does not fit in a `Decimal`
    pub fn revenue(&self) -> Option<Decimal> {
        Decimal::from(self.quantity)
            .checked_mul(self.unit_price)?
            .checked_sub(self.discount)?
            .checked_add(self.shipping_cost)
    }

    pub fn customer(&self) -> CustomerRecord {
        CustomerRecord {
            id: self.customer_id.clone(),
            name: self.customer_name.clone(),
            email: self.customer_email.clone(),
            address: self.customer_address.clone(),
            other_details: String::new(),
        }
    }

    pub fn product(&self) -> ProductRecord {
        ProductRecord {
            id: self.product_id.clone(),
            name: self.product_name.clone(),
            category: self.category.clone(),
        }
    }

    pub fn order(&self) -> OrderRecord {
        OrderRecord {
            id: self.order_id.clone(),
            customer_id: self.customer_id.clone(),
            product_id: self.product_id.clone(),
            region: self.region.clone(),
            date: self.date.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price.to_f64().unwrap_or_default(),
            discount: self.discount.to_f64().unwrap_or_default(),
            shipping_cost: self.shipping_cost.to_f64().unwrap_or_default(),
            payment_method: self.payment_method.clone(),
        }
    }
}

/// Rows read from a CSV file
#[derive(Debug, Clone, Default)]
pub struct ParsedSales {
    pub rows: Vec<SaleRow>,
    /// Data records seen, accepted or not
    pub rows_read: usize,
    /// Records dropped for null numerics or unreadable CSV
    pub rows_skipped: usize,
}

/// Positions of the known columns in the header row
#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    order_id: usize,
    customer_id: usize,
    customer_name: usize,
    customer_email: usize,
    customer_address: usize,
    product_id: usize,
    product_name: usize,
    category: usize,
    region: usize,
    date: usize,
    quantity: usize,
    unit_price: usize,
    discount: usize,
    shipping_cost: usize,
    payment_method: Option<usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, IngestError> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let require =
            |name: &'static str| find(name).ok_or(IngestError::MissingColumn(name));

        Ok(Self {
            order_id: require(ORDER_ID)?,
            customer_id: require(CUSTOMER_ID)?,
            customer_name: require(CUSTOMER_NAME)?,
            customer_email: require(CUSTOMER_EMAIL)?,
            customer_address: require(CUSTOMER_ADDRESS)?,
            product_id: require(PRODUCT_ID)?,
            product_name: require(PRODUCT_NAME)?,
            category: require(CATEGORY)?,
            region: require(REGION)?,
            date: require(DATE_OF_SALE)?,
            quantity: require(QUANTITY_SOLD)?,
            unit_price: require(UNIT_PRICE)?,
            discount: require(DISCOUNT)?,
            shipping_cost: require(SHIPPING_COST)?,
            payment_method: find(PAYMENT_METHOD),
        })
    }

    /// Coerce one record; `None` when a numeric field is null
    fn coerce(&self, record: &csv::StringRecord) -> Option<SaleRow> {
        let text = |idx: usize| record.get(idx).unwrap_or_default().to_string();

        let quantity = parse_int(record.get(self.quantity)?)?;
        let unit_price = parse_decimal(record.get(self.unit_price)?)?;
        let discount = parse_decimal(record.get(self.discount)?)?;
        let shipping_cost = parse_decimal(record.get(self.shipping_cost)?)?;

        Some(SaleRow {
            order_id: text(self.order_id),
            customer_id: text(self.customer_id),
            customer_name: text(self.customer_name),
            customer_email: text(self.customer_email),
            customer_address: text(self.customer_address),
            product_id: text(self.product_id),
            product_name: text(self.product_name),
            category: text(self.category),
            region: text(self.region),
            date: text(self.date),
            quantity,
            unit_price,
            discount,
            shipping_cost,
            payment_method: self.payment_method.map(text).unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Integer coercion; surrounding whitespace is ignored, anything else fails
pub fn parse_int(value: &str) -> Option<i64> {
    let value = value.trim();
    // Underscore digit separators ("1_000") are allowed between digits only
    let bytes = value.as_bytes();
    let separators_ok = bytes.iter().enumerate().all(|(i, b)| {
        *b != b'_'
            || (i > 0
                && i + 1 < bytes.len()
                && bytes[i - 1].is_ascii_digit()
                && bytes[i + 1].is_ascii_digit())
    });
    if !separators_ok {
        return None;
    }
    value.replace('_', "").parse().ok()
}

/// Decimal coercion; accepts plain and scientific notation
pub fn parse_decimal(value: &str) -> Option<Decimal> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Parse CSV bytes into sale rows.
///
/// Fails only when the header row is unreadable or a required column is
/// missing; records with null numerics or unreadable bytes are counted and
/// skipped.
pub fn parse_sales(data: &[u8]) -> Result<ParsedSales, IngestError> {
    // Short records read as null trailing cells, extra cells are ignored
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(data);

    let headers = reader.headers()?.clone();
    let columns = ColumnIndex::from_headers(&headers)?;

    let mut parsed = ParsedSales::default();
    for (line, result) in reader.records().enumerate() {
        parsed.rows_read += 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                debug!(record = line + 1, error = %e, "Skipping malformed CSV record");
                parsed.rows_skipped += 1;
                continue;
            }
        };

        match columns.coerce(&record) {
            Some(row) => parsed.rows.push(row),
            None => {
                debug!(record = line + 1, "Skipping row with missing numeric fields");
                parsed.rows_skipped += 1;
            }
        }
    }

    Ok(parsed)
}
