use crate::aggregate::{CategoryShare, CategoryTotal, Summary};
use crate::error::{DashboardError, Result};
use crate::session::Theme;
use chrono::{Datelike, NaiveDate};
use plotters::coord::Shift;
use plotters::element::Pie;
use plotters::prelude::*;
use serde::Serialize;
use std::error::Error;
use std::io::Cursor;

/// Chart shapes the dashboard draws
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphType {
    /// Line with a marker on every point, x is a date
    Line,

    /// One bar per category
    Bar,

    /// One slice per category, sized by its share of the total
    Pie,
}

/// Rendering options shared by every chart
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Width of the graph in pixels
    pub width: u32,

    /// Height of the graph in pixels
    pub height: u32,

    /// Light or dark colors
    pub theme: Theme,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            theme: Theme::Light,
        }
    }
}

/// Values a chart plots
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "points", rename_all = "snake_case")]
pub enum ChartData {
    /// (category, value) pairs, drawn in the given order
    Categories(Vec<(String, f64)>),
    /// (date, value) pairs, already in date order
    TimeSeries(Vec<(NaiveDate, f64)>),
}

impl ChartData {
    pub fn len(&self) -> usize {
        match self {
            ChartData::Categories(c) => c.len(),
            ChartData::TimeSeries(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A chart ready to be shown or rasterized
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Chart {
    /// Stable identifier, also used in URLs
    pub id: &'static str,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub graph_type: GraphType,
    pub data: ChartData,
}

pub const SALES_BY_PRODUCT: &str = "sales_by_product";
pub const SALES_OVER_TIME: &str = "sales_over_time";
pub const SALES_BY_CHANNEL: &str = "sales_by_channel";
pub const PAYMENT_METHODS: &str = "payment_methods";
pub const SALES_BY_STATE: &str = "sales_by_state";

/// The five dashboard charts, in page order
///
/// Sales by product (bar), sales over time (line), sales by channel (pie),
/// payment methods (pie) and sales by state (bar).
pub fn dashboard_charts(summary: &Summary) -> Vec<Chart> {
    vec![
        Chart {
            id: SALES_BY_PRODUCT,
            title: "Sales by Product".to_string(),
            x_label: "Product".to_string(),
            y_label: "Total Price".to_string(),
            graph_type: GraphType::Bar,
            data: ChartData::Categories(totals(&summary.sales_by_product)),
        },
        Chart {
            id: SALES_OVER_TIME,
            title: "Sales Over Time".to_string(),
            x_label: "Date".to_string(),
            y_label: "Total Price".to_string(),
            graph_type: GraphType::Line,
            data: ChartData::TimeSeries(
                summary
                    .sales_over_time
                    .iter()
                    .map(|p| (p.date, p.total))
                    .collect(),
            ),
        },
        Chart {
            id: SALES_BY_CHANNEL,
            title: "Sales by Channel".to_string(),
            x_label: "Sales Channel".to_string(),
            y_label: "Total Price".to_string(),
            graph_type: GraphType::Pie,
            data: ChartData::Categories(shares(&summary.sales_by_channel)),
        },
        Chart {
            id: PAYMENT_METHODS,
            title: "Payment Methods".to_string(),
            x_label: "Payment Method".to_string(),
            y_label: "Total Price".to_string(),
            graph_type: GraphType::Pie,
            data: ChartData::Categories(shares(&summary.payment_methods)),
        },
        Chart {
            id: SALES_BY_STATE,
            title: "Sales by State".to_string(),
            x_label: "State".to_string(),
            y_label: "Total Price".to_string(),
            graph_type: GraphType::Bar,
            data: ChartData::Categories(totals(&summary.sales_by_state)),
        },
    ]
}

fn totals(items: &[CategoryTotal]) -> Vec<(String, f64)> {
    items.iter().map(|c| (c.key.clone(), c.total)).collect()
}

fn shares(items: &[CategoryShare]) -> Vec<(String, f64)> {
    items.iter().map(|c| (c.key.clone(), c.total)).collect()
}

/// Background, foreground and series colors for one theme
struct Palette {
    background: RGBColor,
    foreground: RGBColor,
}

// Qualitative series colors, cycled per category
const SERIES: [RGBColor; 10] = [
    RGBColor(99, 110, 250),
    RGBColor(239, 85, 59),
    RGBColor(0, 204, 150),
    RGBColor(171, 99, 250),
    RGBColor(255, 161, 90),
    RGBColor(25, 211, 243),
    RGBColor(255, 102, 146),
    RGBColor(182, 232, 128),
    RGBColor(255, 151, 255),
    RGBColor(254, 203, 82),
];

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Light => Palette {
                background: WHITE,
                foreground: RGBColor(38, 39, 48),
            },
            Theme::Dark => Palette {
                background: RGBColor(14, 17, 23),
                foreground: RGBColor(250, 250, 250),
            },
        }
    }

    fn series(&self, i: usize) -> RGBColor {
        SERIES[i % SERIES.len()]
    }
}

type DrawResult = std::result::Result<(), Box<dyn Error>>;

/// Rasterize a chart to PNG bytes
///
/// Any drawing failure (no usable font, zero-sized canvas, encoder error)
/// comes back as [`DashboardError::Render`].
pub fn create_graph(chart: &Chart, options: &GraphOptions) -> Result<Vec<u8>> {
    if chart.data.is_empty() {
        return Err(DashboardError::Render(format!(
            "chart `{}` has nothing to plot",
            chart.id
        )));
    }
    let palette = Palette::for_theme(options.theme);

    render_png(options, |root| match (&chart.graph_type, &chart.data) {
        (GraphType::Bar, ChartData::Categories(bars)) => draw_bars(&root, chart, bars, &palette),
        (GraphType::Pie, ChartData::Categories(slices)) => {
            draw_pie(&root, chart, slices, &palette)
        }
        (GraphType::Line, ChartData::TimeSeries(points)) => {
            draw_line(&root, chart, points, &palette)
        }
        (graph_type, _) => Err(format!("{:?} chart cannot plot this data", graph_type).into()),
    })
}

fn render_png<F>(options: &GraphOptions, draw: F) -> Result<Vec<u8>>
where
    F: FnOnce(DrawingArea<BitMapBackend<'_>, Shift>) -> DrawResult,
{
    let (width, height) = (options.width, options.height);
    if width == 0 || height == 0 {
        return Err(DashboardError::Render(format!(
            "invalid chart size {}x{}",
            width, height
        )));
    }

    let mut buffer = vec![0u8; width as usize * height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        draw(root).map_err(|e| DashboardError::Render(e.to_string()))?;
    }

    let image = image::RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| DashboardError::Render("bitmap has the wrong size".to_string()))?;
    let mut png = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png)
        .map_err(|e| DashboardError::Render(e.to_string()))?;
    Ok(png)
}

fn draw_bars(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    chart: &Chart,
    bars: &[(String, f64)],
    palette: &Palette,
) -> DrawResult {
    root.fill(&palette.background)?;

    let max_y = bars.iter().map(|(_, v)| *v).fold(0.0, f64::max);
    let top = if max_y > 0.0 { max_y * 1.1 } else { 1.0 };
    let segments = bars.len().max(1) as i32;

    let mut ctx = ChartBuilder::on(root)
        .caption(&chart.title, ("sans-serif", 30).into_font().color(&palette.foreground))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d((0..segments).into_segmented(), 0f64..top)?;

    ctx.configure_mesh()
        .disable_x_mesh()
        .x_desc(&chart.x_label)
        .y_desc(&chart.y_label)
        .x_labels(bars.len())
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => bars
                .get(*i as usize)
                .map(|(key, _)| key.clone())
                .unwrap_or_default(),
            _ => String::new(),
        })
        .axis_style(&palette.foreground)
        .label_style(("sans-serif", 14).into_font().color(&palette.foreground))
        .draw()?;

    // Draw bars with a little space between neighbours
    ctx.draw_series(bars.iter().enumerate().map(|(i, (_, v))| {
        let x = i as i32;
        let mut bar = Rectangle::new(
            [(SegmentValue::Exact(x), 0.0), (SegmentValue::Exact(x + 1), *v)],
            palette.series(i).filled(),
        );
        bar.set_margin(0, 0, 6, 6);
        bar
    }))?;

    root.present()?;
    Ok(())
}

fn draw_line(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    chart: &Chart,
    points: &[(NaiveDate, f64)],
    palette: &Palette,
) -> DrawResult {
    root.fill(&palette.background)?;

    let day = |d: &NaiveDate| d.num_days_from_ce();
    let first = points.first().map(|(d, _)| day(d)).unwrap_or(0);
    let last = points.last().map(|(d, _)| day(d)).unwrap_or(0);
    let max_y = points.iter().map(|(_, v)| *v).fold(0.0, f64::max);
    let top = if max_y > 0.0 { max_y * 1.1 } else { 1.0 };

    let mut ctx = ChartBuilder::on(root)
        .caption(&chart.title, ("sans-serif", 30).into_font().color(&palette.foreground))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(first..last + 1, 0f64..top)?;

    ctx.configure_mesh()
        .x_desc(&chart.x_label)
        .y_desc(&chart.y_label)
        .x_labels(6)
        .x_label_formatter(&|d: &i32| {
            NaiveDate::from_num_days_from_ce_opt(*d)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default()
        })
        .axis_style(&palette.foreground)
        .label_style(("sans-serif", 14).into_font().color(&palette.foreground))
        .draw()?;

    let color = palette.series(0);
    ctx.draw_series(LineSeries::new(
        points.iter().map(|(d, v)| (day(d), *v)),
        &color,
    ))?;
    ctx.draw_series(
        points
            .iter()
            .map(|(d, v)| Circle::new((day(d), *v), 4, color.filled())),
    )?;

    root.present()?;
    Ok(())
}

fn draw_pie(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    chart: &Chart,
    slices: &[(String, f64)],
    palette: &Palette,
) -> DrawResult {
    root.fill(&palette.background)?;
    let area = root.titled(
        &chart.title,
        ("sans-serif", 30).into_font().color(&palette.foreground),
    )?;

    let sizes: Vec<f64> = slices.iter().map(|(_, v)| v.max(0.0)).collect();
    // nothing to share out
    if sizes.iter().sum::<f64>() > 0.0 {
        let (w, h) = area.dim_in_pixel();
        let center = (w as i32 / 2, h as i32 / 2);
        let radius = w.min(h) as f64 * 0.35;
        let colors: Vec<RGBColor> = (0..slices.len()).map(|i| palette.series(i)).collect();
        let labels: Vec<String> = slices.iter().map(|(key, _)| key.clone()).collect();

        let mut pie = Pie::new(&center, &radius, &sizes, &colors, &labels);
        pie.label_style(("sans-serif", 16).into_font().color(&palette.foreground));
        pie.percentages(("sans-serif", 14).into_font().color(&palette.background));
        area.draw(&pie)?;
    }

    root.present()?;
    Ok(())
}
