use crate::error::{DashboardError, DateParseError, Result};
use crate::table::{DATE, PAYMENT_METHOD, PRODUCT, SALES_CHANNEL, STATE, TOTAL_PRICE, Table, Value};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Summed sales of one category
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub key: String,
    pub total: f64,
}

/// A category's slice of a pie: its total and its fraction of the whole
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryShare {
    pub key: String,
    pub total: f64,
    pub share: f64,
}

/// One row of the sales-over-time series
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SalePoint {
    pub date: NaiveDate,
    pub total: f64,
}

/// KPIs and chart data computed from one filtered table
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub total_sales: f64,
    pub total_orders: usize,
    pub best_product: String,
    pub top_state: String,
    pub sales_by_product: Vec<CategoryTotal>,
    /// Every row, in date order (ties keep table order)
    pub sales_over_time: Vec<SalePoint>,
    pub sales_by_channel: Vec<CategoryShare>,
    pub payment_methods: Vec<CategoryShare>,
    pub sales_by_state: Vec<CategoryTotal>,
}

/// Compute the dashboard numbers for a filtered, normalized table
///
/// Grouped series come out sorted by category. When several categories
/// share the largest total, the alphabetically first one is reported as
/// best product / top state.
///
/// # Arguments
/// * `table` - Filtered rows; `Date` must already be normalized and the
///   `Product`, `State`, `Sales Channel`, `Payment Method` and
///   `Total Price` columns present
///
/// # Returns
/// * `Result<Summary>` - The KPIs and chart series, or
///   [`DashboardError::EmptyAggregation`] for a table without rows,
///   `MissingColumn` for an absent column and `InvalidValue` for a price
///   that is neither a number nor missing
///
/// # Examples
/// ```
/// use insightedge::{aggregate, load, normalize};
///
/// let csv = b"Date,Product,State,Sales Channel,Payment Method,Total Price\n\
/// 2024-01-01,Widget,NY,Online,Card,100\n\
/// 2024-01-02,Gadget,CA,Store,Cash,NaN\n";
/// let table = normalize(load(csv, "sales.csv").unwrap()).unwrap();
/// let summary = aggregate(&table).unwrap();
/// assert_eq!(summary.total_sales, 100.0);
/// assert_eq!(summary.total_orders, 2);
/// assert_eq!(summary.best_product, "Widget");
/// ```
pub fn aggregate(table: &Table) -> Result<Summary> {
    if table.is_empty() {
        return Err(DashboardError::EmptyAggregation);
    }

    let prices = prices(table)?;
    let total_sales: f64 = prices.iter().sum();

    let sales_by_product = group_sum(table, PRODUCT, &prices)?;
    let sales_by_state = group_sum(table, STATE, &prices)?;
    let sales_by_channel = shares(group_sum(table, SALES_CHANNEL, &prices)?);
    let payment_methods = shares(group_sum(table, PAYMENT_METHOD, &prices)?);

    let best_product = argmax(&sales_by_product).ok_or(DashboardError::EmptyAggregation)?;
    let top_state = argmax(&sales_by_state).ok_or(DashboardError::EmptyAggregation)?;

    let date_col = table
        .column_index(DATE)
        .ok_or_else(|| DashboardError::MissingColumn(DATE.to_string()))?;
    let mut sales_over_time = table
        .rows
        .iter()
        .zip(&prices)
        .enumerate()
        .map(|(i, (row, total))| -> Result<SalePoint> {
            let date = row.get(date_col).and_then(Value::as_date).ok_or_else(|| {
                DateParseError::Unparseable {
                    row: i,
                    value: row.get(date_col).map(Value::to_string).unwrap_or_default(),
                }
            })?;
            Ok(SalePoint {
                date,
                total: *total,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    sales_over_time.sort_by_key(|p| p.date);

    Ok(Summary {
        total_sales,
        total_orders: table.len(),
        best_product,
        top_state,
        sales_by_product,
        sales_over_time,
        sales_by_channel,
        payment_methods,
        sales_by_state,
    })
}

// `Total Price` of every row; missing values (blank, NaN, NA tokens) count
// as zero.
fn prices(table: &Table) -> Result<Vec<f64>> {
    let col = table
        .column_index(TOTAL_PRICE)
        .ok_or_else(|| DashboardError::MissingColumn(TOTAL_PRICE.to_string()))?;

    table
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| match row.get(col) {
            None => Ok(0.0),
            Some(v) if v.is_missing() => Ok(0.0),
            Some(v) => v.as_f64().ok_or_else(|| DashboardError::InvalidValue {
                column: TOTAL_PRICE.to_string(),
                row: i,
                value: v.to_string(),
            }),
        })
        .collect()
}

fn group_sum(table: &Table, column: &str, prices: &[f64]) -> Result<Vec<CategoryTotal>> {
    let col = table
        .column_index(column)
        .ok_or_else(|| DashboardError::MissingColumn(column.to_string()))?;

    let mut groups: BTreeMap<String, f64> = BTreeMap::new();
    for (row, price) in table.rows.iter().zip(prices) {
        let key = row.get(col).map(Value::to_string).unwrap_or_default();
        *groups.entry(key).or_insert(0.0) += price;
    }

    Ok(groups
        .into_iter()
        .map(|(key, total)| CategoryTotal { key, total })
        .collect())
}

fn shares(totals: Vec<CategoryTotal>) -> Vec<CategoryShare> {
    let whole: f64 = totals.iter().map(|t| t.total).sum();
    totals
        .into_iter()
        .map(|CategoryTotal { key, total }| CategoryShare {
            key,
            total,
            share: if whole == 0.0 { 0.0 } else { total / whole },
        })
        .collect()
}

/// Key of the largest total; `totals` is key-sorted so the first maximum
/// is also the alphabetically smallest
fn argmax(totals: &[CategoryTotal]) -> Option<String> {
    let mut best: Option<&CategoryTotal> = None;
    for t in totals {
        match best {
            Some(b) if t.total <= b.total => {}
            _ => best = Some(t),
        }
    }
    best.map(|b| b.key.clone())
}
