//! Revenue repository — read-only rollups over the orders table
//!
//! Every query filters on `date >= start AND date <= end`. Dates are stored as
//! the raw CSV text, so the comparison is lexical; ISO `YYYY-MM-DD` dates sort
//! correctly, anything else sorts however its characters do.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use std::str::FromStr;

/// Per-order revenue, shared by every rollup
const REVENUE_EXPR: &str = "(o.quantity * o.unit_price) - o.discount + o.shipping_cost";

/// Inclusive date range, compared as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Bucket size for revenue trends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendInterval {
    #[default]
    Monthly,
    Quarterly,
    Yearly,
}

impl TrendInterval {
    /// SQL expression producing the period label for an order
    fn period_expr(self) -> &'static str {
        match self {
            Self::Monthly => "substr(o.date, 1, 7)",
            Self::Quarterly => {
                "substr(o.date, 1, 4) || '-Q' || ((CAST(substr(o.date, 6, 2) AS INTEGER) - 1) / 3 + 1)"
            }
            Self::Yearly => "substr(o.date, 1, 4)",
        }
    }

    /// Sort key for the buckets; quarters order numerically within a year
    fn order_expr(self) -> &'static str {
        match self {
            Self::Monthly | Self::Yearly => "period",
            Self::Quarterly => {
                "substr(o.date, 1, 4), (CAST(substr(o.date, 6, 2) AS INTEGER) - 1) / 3 + 1"
            }
        }
    }
}

impl FromStr for TrendInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            other => Err(format!("unknown interval: {other}")),
        }
    }
}

impl fmt::Display for TrendInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProductRevenue {
    pub product_id: String,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CategoryRevenue {
    pub category: String,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RegionRevenue {
    pub region: String,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PeriodRevenue {
    pub period: String,
    pub total_revenue: f64,
}

/// Repository for revenue aggregations
pub struct RevenueRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RevenueRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Sum of revenue in range, `0.0` when nothing matches
    pub async fn total_revenue(&self, range: &DateRange) -> DbResult<f64> {
        let sql = format!(
            "SELECT COALESCE(SUM({REVENUE_EXPR}), 0.0) FROM orders o WHERE o.date >= ? AND o.date <= ?"
        );
        let (total,): (f64,) = sqlx::query_as(&sql)
            .bind(&range.start)
            .bind(&range.end)
            .fetch_one(self.pool)
            .await?;

        Ok(total)
    }

    pub async fn revenue_by_product(&self, range: &DateRange) -> DbResult<Vec<ProductRevenue>> {
        let sql = format!(
            r#"
            SELECT o.product_id AS product_id, SUM({REVENUE_EXPR}) AS total_revenue
            FROM orders o
            WHERE o.date >= ? AND o.date <= ?
            GROUP BY o.product_id
            ORDER BY o.product_id
            "#
        );
        let rows = sqlx::query_as::<_, ProductRevenue>(&sql)
            .bind(&range.start)
            .bind(&range.end)
            .fetch_all(self.pool)
            .await?;

        Ok(rows)
    }

    /// Orders whose product row is missing drop out of this rollup (inner join)
    pub async fn revenue_by_category(&self, range: &DateRange) -> DbResult<Vec<CategoryRevenue>> {
        let sql = format!(
            r#"
            SELECT p.category AS category, SUM({REVENUE_EXPR}) AS total_revenue
            FROM orders o
            JOIN products p ON p.id = o.product_id
            WHERE o.date >= ? AND o.date <= ?
            GROUP BY p.category
            ORDER BY p.category
            "#
        );
        let rows = sqlx::query_as::<_, CategoryRevenue>(&sql)
            .bind(&range.start)
            .bind(&range.end)
            .fetch_all(self.pool)
            .await?;

        Ok(rows)
    }

    pub async fn revenue_by_region(&self, range: &DateRange) -> DbResult<Vec<RegionRevenue>> {
        let sql = format!(
            r#"
            SELECT o.region AS region, SUM({REVENUE_EXPR}) AS total_revenue
            FROM orders o
            WHERE o.date >= ? AND o.date <= ?
            GROUP BY o.region
            ORDER BY o.region
            "#
        );
        let rows = sqlx::query_as::<_, RegionRevenue>(&sql)
            .bind(&range.start)
            .bind(&range.end)
            .fetch_all(self.pool)
            .await?;

        Ok(rows)
    }

    /// Revenue bucketed by month (`YYYY-MM`), quarter (`YYYY-Qn`) or year (`YYYY`),
    /// ascending by period
    pub async fn revenue_trends(
        &self,
        range: &DateRange,
        interval: TrendInterval,
    ) -> DbResult<Vec<PeriodRevenue>> {
        let period = interval.period_expr();
        let order = interval.order_expr();
        let sql = format!(
            r#"
            SELECT {period} AS period, SUM({REVENUE_EXPR}) AS total_revenue
            FROM orders o
            WHERE o.date >= ? AND o.date <= ?
            GROUP BY period
            ORDER BY {order}
            "#
        );
        let rows = sqlx::query_as::<_, PeriodRevenue>(&sql)
            .bind(&range.start)
            .bind(&range.end)
            .fetch_all(self.pool)
            .await?;

        Ok(rows)
    }
}
