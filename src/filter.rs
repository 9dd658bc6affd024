use crate::dates::date_bounds;
use crate::error::{DashboardError, DateParseError, Result};
use crate::table::{DATE, PRODUCT, STATE, Table};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A fully resolved filter: inclusive date range plus two allow-lists
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Filters {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub products: BTreeSet<String>,
    pub states: BTreeSet<String>,
}

impl Filters {
    pub fn new<P, S>(start: NaiveDate, end: NaiveDate, products: P, states: S) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Filters {
            start,
            end,
            products: products.into_iter().map(Into::into).collect(),
            states: states.into_iter().map(Into::into).collect(),
        }
    }

    pub fn admits(&self, date: NaiveDate, product: &str, state: &str) -> bool {
        self.start <= date
            && date <= self.end
            && self.products.contains(product)
            && self.states.contains(state)
    }
}

/// Keep the rows whose date, product and state all pass `filters`
///
/// Row order is preserved. An inverted range or an empty allow-list simply
/// matches nothing. The table must have been through
/// [`normalize`](crate::dates::normalize).
///
/// # Examples
/// ```
/// use chrono::NaiveDate;
/// use insightedge::{dates::normalize, filter::{Filters, filter}, loader::load};
///
/// let csv = b"Date,Product,State,Total Price\n2024-01-01,Widget,NY,100\n2024-01-05,Gadget,CA,50\n";
/// let table = normalize(load(csv, "sales.csv").unwrap()).unwrap();
/// let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
///
/// let filters = Filters::new(day(1), day(3), ["Widget", "Gadget"], ["NY", "CA"]);
/// assert_eq!(filter(&table, &filters).unwrap().len(), 1);
/// ```
pub fn filter(table: &Table, filters: &Filters) -> Result<Table> {
    let date_col = required(table, DATE)?;
    let product_col = required(table, PRODUCT)?;
    let state_col = required(table, STATE)?;

    let mut kept = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        let date = row.get(date_col).and_then(|v| v.as_date()).ok_or_else(|| {
            DateParseError::Unparseable {
                row: i,
                value: row.get(date_col).map(|v| v.to_string()).unwrap_or_default(),
            }
        })?;
        let product = row.get(product_col).map(|v| v.to_string()).unwrap_or_default();
        let state = row.get(state_col).map(|v| v.to_string()).unwrap_or_default();

        if filters.admits(date, &product, &state) {
            kept.push(row.clone());
        }
    }

    Ok(table.with_rows(kept))
}

fn required(table: &Table, column: &str) -> Result<usize> {
    table
        .column_index(column)
        .ok_or_else(|| DashboardError::MissingColumn(column.to_string()))
}

/// What the filter controls may offer for one uploaded table
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilterOptions {
    pub min_date: NaiveDate,
    pub max_date: NaiveDate,
    pub products: Vec<String>,
    pub states: Vec<String>,
}

/// A user's filter choice; anything left out falls back to "everything"
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct FilterSelection {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub products: Option<Vec<String>>,
    pub states: Option<Vec<String>>,
}

impl FilterOptions {
    /// Observed date bounds and distinct products/states of a normalized
    /// table, or `None` when it has no rows
    pub fn from_table(table: &Table) -> Option<Self> {
        let (min_date, max_date) = date_bounds(table)?;
        Some(FilterOptions {
            min_date,
            max_date,
            products: table.distinct(PRODUCT),
            states: table.distinct(STATE),
        })
    }

    /// The filters the dashboard starts with: whole range, every value
    pub fn defaults(&self) -> Filters {
        Filters::new(
            self.min_date,
            self.max_date,
            self.products.iter().cloned(),
            self.states.iter().cloned(),
        )
    }

    /// Fill the gaps of a selection and clamp its dates to the observed range
    pub fn resolve(&self, selection: &FilterSelection) -> Filters {
        let clamp = |d: NaiveDate| d.clamp(self.min_date, self.max_date);
        Filters {
            start: selection.start.map(clamp).unwrap_or(self.min_date),
            end: selection.end.map(clamp).unwrap_or(self.max_date),
            products: selection
                .products
                .as_ref()
                .unwrap_or(&self.products)
                .iter()
                .cloned()
                .collect(),
            states: selection
                .states
                .as_ref()
                .unwrap_or(&self.states)
                .iter()
                .cloned()
                .collect(),
        }
    }
}
