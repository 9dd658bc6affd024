use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

pub const DATE: &str = "Date";
pub const PRODUCT: &str = "Product";
pub const STATE: &str = "State";
pub const SALES_CHANNEL: &str = "Sales Channel";
pub const PAYMENT_METHOD: &str = "Payment Method";
pub const TOTAL_PRICE: &str = "Total Price";

/// Cell texts read as missing values, the same set pandas treats as NA by
/// default
pub const NA_TOKENS: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Whether a raw cell text stands for a missing value
///
/// # Examples
/// ```
/// use insightedge::table::is_na_token;
///
/// assert!(is_na_token(" N/A "));
/// assert!(is_na_token(""));
/// assert!(!is_na_token("0"));
/// ```
pub fn is_na_token(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || NA_TOKENS.contains(&cell)
}

/// A single typed cell
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    /// Numeric view of the cell
    ///
    /// Text is parsed. Only finite numbers count, so `NaN` and infinities
    /// give `None` just like dates or booleans do.
    pub fn as_f64(&self) -> Option<f64> {
        let x = match self {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Text(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        x.is_finite().then_some(x)
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, a `NaN` float, or text that is one of the [`NA_TOKENS`]
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Float(f) => f.is_nan(),
            Value::Text(s) => is_na_token(s),
            other => other.is_null(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{}", i),
            // whole floats keep their `.0` so they read back as floats
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Ordered rows of named columns
///
/// Rows are stored positionally; `columns[i]` names the i-th value of every
/// row. Stages never edit a table in place, they derive a new one.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create a table with the given columns and no rows
    ///
    /// # Arguments
    /// * `columns` - Column names, in display order
    ///
    /// # Examples
    /// ```
    /// use insightedge::Table;
    ///
    /// let table = Table::new(vec!["Date".to_string(), "Product".to_string()]);
    /// assert!(table.is_empty());
    /// assert_eq!(table.column_index("Product"), Some(1));
    /// ```
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from rows; short rows are padded with `Null`
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Table { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Same columns, a different set of rows
    pub fn with_rows(&self, rows: Vec<Vec<Value>>) -> Table {
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Cell lookup by row position and column name
    ///
    /// # Arguments
    /// * `row` - Zero-based row position
    /// * `column` - Column name, matched exactly
    ///
    /// # Returns
    /// * `Option<&Value>` - The cell, or `None` if either the row or the
    ///   column does not exist
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Distinct display values of a column in first-seen order
    pub fn distinct(&self, column: &str) -> Vec<String> {
        let Some(col) = self.column_index(column) else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .filter_map(|row| row.get(col).map(Value::to_string))
            .filter(|key| seen.insert(key.clone()))
            .collect()
    }
}
