use crate::error::{DashboardError, Result};
use crate::table::{Table, Value, is_na_token};
use chrono::{Days, NaiveDate};
use log::debug;
use serde_json::{Map, Value as Json};
use std::io::Cursor;
use std::path::Path;

/// File formats an upload can be decoded from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Csv,
    Xlsx,
}

impl FileFormat {
    /// Pick the format from the literal, case-sensitive end of a file name
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with("json") {
            Some(FileFormat::Json)
        } else if name.ends_with("csv") {
            Some(FileFormat::Csv)
        } else if name.ends_with("xlsx") {
            Some(FileFormat::Xlsx)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Json => "json",
            FileFormat::Csv => "csv",
            FileFormat::Xlsx => "xlsx",
        }
    }
}

/// Decode an uploaded file into a table
///
/// The format is chosen from `file_name`. Names that end in none of
/// `json`, `csv` or `xlsx` are rejected with a decode error.
///
/// # Examples
/// ```
/// use insightedge::loader::load;
///
/// let table = load(b"Date,Total Price\n2024-01-01,10.5\n", "sales.csv").unwrap();
/// assert_eq!(table.len(), 1);
/// assert!(load(b"", "sales.txt").is_err());
/// ```
pub fn load(bytes: &[u8], file_name: &str) -> Result<Table> {
    let format = FileFormat::from_file_name(file_name).ok_or_else(|| {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or(file_name);
        DashboardError::decode(
            extension,
            "unsupported file type, expected json, csv or xlsx",
        )
    })?;

    let table = match format {
        FileFormat::Json => from_json(bytes)?,
        FileFormat::Csv => from_csv(bytes)?,
        FileFormat::Xlsx => from_excel(bytes)?,
    };
    debug!(
        "decoded {} as {}: {} columns, {} rows",
        file_name,
        format.as_str(),
        table.columns.len(),
        table.len()
    );
    Ok(table)
}

/// Read a file from disk and decode it according to its name
pub fn load_path(filepath: impl AsRef<Path>) -> Result<Table> {
    let path = filepath.as_ref();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let bytes = std::fs::read(path)
        .map_err(|e| DashboardError::decode(&name, format!("cannot read {}: {}", path.display(), e)))?;
    load(&bytes, &name)
}

/// Decode CSV bytes; the first record is the header
///
/// Each column gets one type: integer if every present cell is an
/// integer, float if every one is a finite number, text otherwise. Blank
/// cells and NA tokens (`NaN`, `N/A`, `null`, ...) are missing and load as
/// `Value::Null` whatever the column type.
pub fn from_csv(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| DashboardError::decode("csv", e))?
        .iter()
        .map(str::to_string)
        .collect();

    if columns.is_empty() || columns.iter().all(String::is_empty) {
        return Err(DashboardError::decode("csv", "no columns to parse"));
    }

    let mut raw: Vec<Vec<String>> = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DashboardError::decode("csv", e))?;
        if record.len() > columns.len() {
            return Err(DashboardError::decode(
                "csv",
                format!(
                    "expected {} fields in line {}, saw {}",
                    columns.len(),
                    line + 2,
                    record.len()
                ),
            ));
        }
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(columns.len(), String::new());
        raw.push(row);
    }

    let kinds: Vec<CellKind> = (0..columns.len())
        .map(|c| CellKind::infer(raw.iter().map(|row| row[c].as_str())))
        .collect();

    let rows = raw
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(&kinds)
                .map(|(cell, kind)| kind.parse(cell))
                .collect()
        })
        .collect();

    Ok(Table { columns, rows })
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum CellKind {
    Int,
    Float,
    Text,
}

impl CellKind {
    fn infer<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut kind = CellKind::Int;
        for cell in cells.filter(|c| !is_na_token(c)).map(str::trim) {
            if kind == CellKind::Int && cell.parse::<i64>().is_err() {
                kind = CellKind::Float;
            }
            if kind == CellKind::Float && !cell.parse::<f64>().is_ok_and(f64::is_finite) {
                return CellKind::Text;
            }
        }
        kind
    }

    fn parse(&self, cell: String) -> Value {
        if is_na_token(&cell) {
            return Value::Null;
        }
        let trimmed = cell.trim();
        match self {
            CellKind::Int => trimmed.parse().map(Value::Int).unwrap_or(Value::Text(cell)),
            CellKind::Float => trimmed
                .parse()
                .map(Value::Float)
                .unwrap_or(Value::Text(cell)),
            CellKind::Text => Value::Text(cell),
        }
    }
}

/// Decode JSON bytes
///
/// Two layouts are understood: a list of record objects, and an object
/// mapping each column to its values (keyed by row label, or a plain list).
pub fn from_json(bytes: &[u8]) -> Result<Table> {
    let doc: Json = serde_json::from_slice(bytes).map_err(|e| DashboardError::decode("json", e))?;

    match doc {
        Json::Array(records) => from_records(records),
        Json::Object(columns) => from_column_map(columns),
        _ => Err(DashboardError::decode(
            "json",
            "expected a list of records or an object of columns",
        )),
    }
}

fn from_records(records: Vec<Json>) -> Result<Table> {
    let mut columns: Vec<String> = Vec::new();
    let mut objects = Vec::with_capacity(records.len());
    for (i, record) in records.into_iter().enumerate() {
        let Json::Object(object) = record else {
            return Err(DashboardError::decode(
                "json",
                format!("record {} is not an object", i),
            ));
        };
        for key in object.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
        objects.push(object);
    }

    let rows = objects
        .into_iter()
        .map(|mut object| {
            columns
                .iter()
                .map(|c| object.remove(c).map(json_value).unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Ok(Table { columns, rows })
}

fn from_column_map(map: Map<String, Json>) -> Result<Table> {
    let mut labels: Vec<String> = Vec::new();
    let mut cells: Vec<(String, Map<String, Json>)> = Vec::with_capacity(map.len());

    for (column, values) in map {
        let values = match values {
            Json::Object(by_label) => by_label,
            Json::Array(list) => list
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => {
                return Err(DashboardError::decode(
                    "json",
                    format!("column `{}` does not hold a list or an object", column),
                ));
            }
        };
        for label in values.keys() {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        cells.push((column, values));
    }

    let columns = cells.iter().map(|(c, _)| c.clone()).collect();
    let rows = labels
        .iter()
        .map(|label| {
            cells
                .iter_mut()
                .map(|(_, values)| values.remove(label).map(json_value).unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Ok(Table { columns, rows })
}

fn json_value(value: Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        Json::String(s) => Value::Text(s),
        nested => Value::Text(nested.to_string()),
    }
}

/// Decode an XLSX workbook; only the first worksheet is read
///
/// The first row names the columns. Cells the workbook stores as dates come
/// back as `Value::Date`.
pub fn from_excel(bytes: &[u8]) -> Result<Table> {
    use calamine::{Data, Reader, Xlsx};

    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).map_err(|e| DashboardError::decode("xlsx", e))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| DashboardError::decode("xlsx", "no sheets found in workbook"))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| DashboardError::decode("xlsx", e))?;

    let mut sheet_rows = range.rows();
    let Some(header) = sheet_rows.next() else {
        return Ok(Table::default());
    };

    let columns = header
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell {
            Data::Empty => format!("Unnamed: {}", i),
            other => other.to_string(),
        })
        .collect();

    let rows = sheet_rows
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::Int(i) => Value::Int(*i),
                    Data::Float(f) => Value::Float(*f),
                    Data::String(s) => Value::Text(s.clone()),
                    Data::Bool(b) => Value::Bool(*b),
                    Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
                        .map(Value::Date)
                        .unwrap_or(Value::Float(dt.as_f64())),
                    Data::DateTimeIso(s) => Value::Text(s.clone()),
                    // durations, cell errors and blanks carry no sales data
                    _ => Value::Null,
                })
                .collect()
        })
        .collect();

    Ok(Table::from_rows(columns, rows))
}

/// Spreadsheet serial day number to calendar date (1900 date system)
pub(crate) fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial.floor() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_is_by_literal_suffix() {
        assert_eq!(FileFormat::from_file_name("a.json"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_file_name("a.csv"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_file_name("a.xlsx"), Some(FileFormat::Xlsx));
        assert_eq!(FileFormat::from_file_name("a.CSV"), None);
        assert_eq!(FileFormat::from_file_name("a.xls"), None);
    }

    #[test]
    fn unsupported_suffix_is_a_decode_error() {
        match load(b"whatever", "report.txt") {
            Err(DashboardError::Decode { format, .. }) => assert_eq!(format, "txt"),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn csv_columns_get_one_type_each() {
        let csv = b"Date,Qty,Total Price,Product\n2024-01-01,1,10,Widget\n2024-01-02,,12.5,7\n";
        let t = from_csv(csv).unwrap();
        assert_eq!(t.columns, vec!["Date", "Qty", "Total Price", "Product"]);
        assert_eq!(t.rows[0][1], Value::Int(1));
        assert_eq!(t.rows[1][1], Value::Null);
        assert_eq!(t.rows[0][2], Value::Float(10.0));
        assert_eq!(t.rows[1][2], Value::Float(12.5));
        assert_eq!(t.rows[1][3], Value::Text("7".into()));
        assert_eq!(t.rows[0][0], Value::Text("2024-01-01".into()));
    }

    #[test]
    fn csv_na_tokens_load_as_null() {
        let csv = b"Product,Total Price\nWidget,NaN\nGadget,N/A\nGizmo,12.5\nnull,3\n";
        let t = from_csv(csv).unwrap();
        assert_eq!(t.rows[0][1], Value::Null);
        assert_eq!(t.rows[1][1], Value::Null);
        assert_eq!(t.rows[2][1], Value::Float(12.5));
        assert_eq!(t.rows[3][1], Value::Float(3.0));
        assert_eq!(t.rows[3][0], Value::Null);
    }

    #[test]
    fn csv_infinite_numbers_make_a_text_column() {
        let t = from_csv(b"Total Price\n1.5\ninf\n").unwrap();
        assert_eq!(t.rows[1][0], Value::Text("inf".into()));
    }

    #[test]
    fn csv_rows_with_extra_fields_are_rejected() {
        let err = from_csv(b"a,b\n1,2,3\n").unwrap_err();
        assert!(matches!(err, DashboardError::Decode { .. }));
    }

    #[test]
    fn csv_short_rows_are_padded() {
        let t = from_csv(b"a,b\n1\n").unwrap();
        assert_eq!(t.rows[0], vec![Value::Int(1), Value::Null]);
    }

    #[test]
    fn empty_csv_is_rejected() {
        assert!(from_csv(b"").is_err());
    }

    #[test]
    fn json_records_keep_first_seen_column_order() {
        let json = br#"[{"Date": "2024-01-01", "Product": "Widget", "Total Price": 100},
                        {"Product": "Gadget", "Date": "2024-01-05", "Total Price": 50.5, "Note": null}]"#;
        let t = from_json(json).unwrap();
        assert_eq!(t.columns, vec!["Date", "Product", "Total Price", "Note"]);
        assert_eq!(t.rows[0][2], Value::Int(100));
        assert_eq!(t.rows[0][3], Value::Null);
        assert_eq!(t.rows[1][1], Value::Text("Gadget".into()));
        assert_eq!(t.rows[1][2], Value::Float(50.5));
    }

    #[test]
    fn json_column_map_is_read_by_row_label() {
        let json = br#"{"Product": {"0": "Widget", "1": "Gadget"}, "Total Price": {"1": 50, "0": 100}}"#;
        let t = from_json(json).unwrap();
        assert_eq!(t.columns, vec!["Product", "Total Price"]);
        assert_eq!(t.rows[0], vec![Value::Text("Widget".into()), Value::Int(100)]);
        assert_eq!(t.rows[1], vec![Value::Text("Gadget".into()), Value::Int(50)]);
    }

    #[test]
    fn json_scalars_are_not_tables() {
        assert!(from_json(b"42").is_err());
        assert!(from_json(b"[1, 2]").is_err());
        assert!(from_json(b"{not json").is_err());
    }

    #[test]
    fn corrupt_workbook_is_a_decode_error() {
        let err = from_excel(b"PK\x03\x04 definitely not a workbook").unwrap_err();
        assert!(matches!(err, DashboardError::Decode { ref format, .. } if format == "xlsx"));
    }

    #[test]
    fn serial_dates_use_the_1900_system() {
        assert_eq!(
            excel_serial_to_date(45292.0),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(
            excel_serial_to_date(45292.75),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(excel_serial_to_date(-1.0), None);
    }
}
