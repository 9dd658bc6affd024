use crate::aggregate::{Summary, aggregate};
use crate::dates::normalize;
use crate::downloader::{chart_png_base64, export_csv};
use crate::error::{DashboardError, Result};
use crate::filter::{FilterOptions, FilterSelection, Filters, filter};
use crate::graph::{Chart, GraphOptions, SALES_BY_PRODUCT, dashboard_charts};
use crate::loader::load;
use crate::session::Theme;
use crate::table::Table;
use log::{info, warn};
use serde::Serialize;

/// The four KPI tiles, formatted for display
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Kpis {
    pub total_sales: String,
    pub total_orders: String,
    pub best_product: String,
    pub top_state: String,
}

impl Kpis {
    pub fn from_summary(summary: &Summary) -> Self {
        Kpis {
            total_sales: format_money(summary.total_sales),
            total_orders: summary.total_orders.to_string(),
            best_product: summary.best_product.clone(),
            top_state: summary.top_state.clone(),
        }
    }
}

/// Everything the page shows after one interaction
#[derive(Clone, Debug, Serialize)]
pub struct DashboardState {
    pub theme: Theme,
    pub options: FilterOptions,
    pub filters: Filters,
    /// The filtered rows, for the raw data preview
    pub filtered: Table,
    pub summary: Summary,
    pub kpis: Kpis,
    pub charts: Vec<Chart>,
    /// CSV download of `filtered`
    #[serde(skip)]
    pub csv: Option<Vec<u8>>,
    /// Base64 PNG of the product chart
    pub product_chart_png: Option<String>,
    /// Export actions that failed; the rest of the dashboard is still valid
    pub export_errors: Vec<String>,
}

impl DashboardState {
    pub fn chart(&self, id: &str) -> Option<&Chart> {
        self.charts.iter().find(|c| c.id == id)
    }
}

/// Decode and normalize an uploaded file
pub fn prepare_upload(bytes: &[u8], file_name: &str) -> Result<Table> {
    let table = load(bytes, file_name)?;
    Ok(normalize(table)?)
}

/// Run filter, aggregation and exports for one interaction
///
/// `table` must be normalized. Filter, aggregation and data errors abort
/// the render; a failed export is only recorded in `export_errors`.
///
/// # Arguments
/// * `table` - The normalized upload
/// * `selection` - What the user picked; gaps are filled from the data
/// * `graph_options` - Size and theme of the inline product chart
///
/// # Returns
/// * `Result<DashboardState>` - Everything the page shows, or the error
///   to display in its place
pub fn render(
    table: &Table,
    selection: &FilterSelection,
    graph_options: &GraphOptions,
) -> Result<DashboardState> {
    let options = FilterOptions::from_table(table).ok_or(DashboardError::EmptyAggregation)?;
    let filters = options.resolve(selection);
    let filtered = filter(table, &filters)?;
    let summary = aggregate(&filtered)?;
    let kpis = Kpis::from_summary(&summary);
    let charts = dashboard_charts(&summary);

    let mut export_errors = Vec::new();
    let csv = export_csv(&filtered)
        .map_err(|e| {
            warn!("csv export failed: {}", e);
            export_errors.push(e.to_string());
        })
        .ok();
    let product_chart_png = charts
        .iter()
        .find(|c| c.id == SALES_BY_PRODUCT)
        .map(|chart| chart_png_base64(chart, graph_options))
        .transpose()
        .map_err(|e| {
            warn!("product chart export failed: {}", e);
            export_errors.push(e.to_string());
        })
        .ok()
        .flatten();

    info!(
        "rendered {} of {} rows, total sales {}",
        filtered.len(),
        table.len(),
        kpis.total_sales
    );

    Ok(DashboardState {
        theme: graph_options.theme,
        options,
        filters,
        filtered,
        summary,
        kpis,
        charts,
        csv,
        product_chart_png,
        export_errors,
    })
}

/// Load, normalize and render a file in one go
pub fn render_file(
    bytes: &[u8],
    file_name: &str,
    selection: &FilterSelection,
    graph_options: &GraphOptions,
) -> Result<DashboardState> {
    let table = prepare_upload(bytes, file_name)?;
    render(&table, selection, graph_options)
}

/// The single message shown when an interaction fails
pub fn error_message(error: &DashboardError) -> String {
    format!("Error loading file: {}", error)
}

/// Format a number with comma thousands separators and two decimals
///
/// # Examples
/// ```
/// use insightedge::dashboard::format_money;
///
/// assert_eq!(format_money(1234567.891), "1,234,567.89");
/// assert_eq!(format_money(-1234.5), "-1,234.50");
/// assert_eq!(format_money(f64::NAN), "n/a");
/// ```
pub fn format_money(value: f64) -> String {
    if !value.is_finite() {
        return "n/a".to_string();
    }
    let formatted = format!("{:.2}", value);
    let (integer_part, decimal_part) = formatted
        .split_once('.')
        .unwrap_or((formatted.as_str(), "00"));
    let (sign, digits) = match integer_part.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", integer_part),
    };

    // Insert a comma every 3 digits from the right
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{}{}.{}", sign, grouped, decimal_part)
}
