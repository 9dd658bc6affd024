use crate::error::DateParseError;
use crate::table::{DATE, Table, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::debug;

// Date-only layouts, tried in order. Month-first wins over day-first for
// ambiguous slashed dates.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%Y%m%d",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Replace every value of the `Date` column with a calendar date
///
/// All-or-nothing: the first value that cannot be read stops the whole
/// normalization and nothing is returned.
///
/// # Arguments
/// * `table` - A freshly loaded table with a `Date` column
///
/// # Returns
/// * `Result<Table, DateParseError>` - The same rows with `Value::Date` in
///   the `Date` column, or the first row whose date could not be read
///
/// # Examples
/// ```
/// use insightedge::{load, normalize, DateParseError};
///
/// let table = load(b"Date,Total Price\n01/31/2024,5\n", "sales.csv").unwrap();
/// let table = normalize(table).unwrap();
/// assert_eq!(table.rows[0][0].to_string(), "2024-01-31");
///
/// let bad = load(b"Date\nsoon\n", "sales.csv").unwrap();
/// assert!(matches!(normalize(bad), Err(DateParseError::Unparseable { row: 0, .. })));
/// ```
pub fn normalize(table: Table) -> Result<Table, DateParseError> {
    let col = table
        .column_index(DATE)
        .ok_or(DateParseError::MissingColumn)?;

    let Table { columns, rows } = table;
    let rows = rows
        .into_iter()
        .enumerate()
        .map(|(i, mut row)| -> Result<Vec<Value>, DateParseError> {
            let date = row
                .get(col)
                .and_then(coerce_date)
                .ok_or_else(|| DateParseError::Unparseable {
                    row: i,
                    value: row.get(col).map(Value::to_string).unwrap_or_default(),
                })?;
            row[col] = Value::Date(date);
            Ok(row)
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!("normalized {} dates", rows.len());
    Ok(Table { columns, rows })
}

/// Read one cell as a calendar date, dropping any time of day
pub fn coerce_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Text(s) => parse_date_str(s),
        Value::Int(i) => from_epoch(*i as f64),
        Value::Float(f) => from_epoch(*f),
        Value::Null | Value::Bool(_) => None,
    }
}

/// Parse a textual date or datetime
pub fn parse_date_str(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        })
}

/// Epoch timestamp to date; the unit is guessed from the magnitude
fn from_epoch(value: f64) -> Option<NaiveDate> {
    if !value.is_finite() {
        return None;
    }
    let magnitude = value.abs();
    let seconds = if magnitude < 1e11 {
        value
    } else if magnitude < 1e14 {
        value / 1e3
    } else if magnitude < 1e17 {
        value / 1e6
    } else {
        value / 1e9
    };
    DateTime::from_timestamp(seconds.round() as i64, 0).map(|dt| dt.date_naive())
}

/// Smallest and largest date of a normalized table
pub fn date_bounds(table: &Table) -> Option<(NaiveDate, NaiveDate)> {
    let col = table.column_index(DATE)?;
    let mut dates = table.rows.iter().filter_map(|r| r.get(col)?.as_date());
    let first = dates.next()?;
    Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
}
