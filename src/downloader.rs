use crate::error::{DashboardError, Result};
use crate::graph::{Chart, GraphOptions, create_graph};
use crate::table::{Table, Value};
use base64::{Engine as _, engine::general_purpose};

/// Encode a table as UTF-8 CSV
///
/// The header row lists the table's columns in order; there is no index
/// column. Dates are written as `YYYY-MM-DD`.
///
/// # Examples
/// ```
/// use insightedge::downloader::export_csv;
/// use insightedge::table::{Table, Value};
///
/// let table = Table::from_rows(
///     vec!["Product".into(), "Total Price".into()],
///     vec![vec![Value::Text("Widget, large".into()), Value::Float(100.0)]],
/// );
/// let csv = export_csv(&table).unwrap();
/// assert_eq!(csv, b"Product,Total Price\n\"Widget, large\",100.0\n");
/// ```
pub fn export_csv(table: &Table) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(&table.columns)
        .map_err(|e| DashboardError::Export(e.to_string()))?;
    for row in &table.rows {
        writer
            .write_record(row.iter().map(Value::to_string))
            .map_err(|e| DashboardError::Export(e.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| DashboardError::Export(e.to_string()))
}

/// Write a table into a single-sheet XLSX workbook
///
/// Numbers and booleans keep their cell types; dates are written as
/// `YYYY-MM-DD` text so they load back unchanged.
///
/// # Arguments
/// * `table` - Rows to write; the header row holds the column names
///
/// # Returns
/// * `Result<Vec<u8>>` - The workbook bytes, or `DashboardError::Export`
pub fn export_xlsx(table: &Table) -> Result<Vec<u8>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let xlsx_err = |e: rust_xlsxwriter::XlsxError| DashboardError::Export(e.to_string());

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    for (c, name) in table.columns.iter().enumerate() {
        worksheet.write_string(0, c as u16, name).map_err(xlsx_err)?;
    }

    for (r, row) in table.rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, value) in row.iter().enumerate() {
            let c = c as u16;
            match value {
                Value::Null => {}
                Value::Bool(b) => {
                    worksheet.write_boolean(r, c, *b).map_err(xlsx_err)?;
                }
                Value::Int(i) => {
                    worksheet.write_number(r, c, *i as f64).map_err(xlsx_err)?;
                }
                Value::Float(f) => {
                    worksheet.write_number(r, c, *f).map_err(xlsx_err)?;
                }
                Value::Date(_) | Value::Text(_) => {
                    worksheet
                        .write_string(r, c, &value.to_string())
                        .map_err(xlsx_err)?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().map_err(xlsx_err)
}

/// Rasterize a chart to PNG bytes
pub fn export_chart_image(chart: &Chart, options: &GraphOptions) -> Result<Vec<u8>> {
    create_graph(chart, options)
}

/// PNG of a chart, base64 encoded for a `data:image/png;base64,` URL
pub fn chart_png_base64(chart: &Chart, options: &GraphOptions) -> Result<String> {
    let png = export_chart_image(chart, options)?;
    Ok(general_purpose::STANDARD.encode(png))
}
