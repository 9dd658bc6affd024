/*!
# InsightEdge

A sales insights dashboard, built in Rust.

## Overview

Upload a sales file (JSON, CSV or Excel), narrow it down by date range,
product and state, and get KPI tiles, five charts, a CSV download of the
filtered rows and an inline PNG of the product chart.

## Pipeline

Every interaction runs the same linear pipeline, each stage a function from
table to table (or to a summary):

1. **Loader** (`loader`) - bytes plus file name to a typed [`Table`]
2. **Date normalizer** (`dates`) - the `Date` column becomes calendar dates,
   or the whole upload is rejected
3. **Filter engine** (`filter`) - inclusive date range AND product
   allow-list AND state allow-list, row order preserved
4. **Aggregator** (`aggregate`) - total sales, order count, best product, top
   state and the chart series
5. **Exporter** (`downloader`, `graph`) - CSV/XLSX of the filtered rows and
   PNG charts

`dashboard::render` ties stages 3-5 together and is re-run from scratch for
every interaction. A [`Session`] holds what outlives one interaction: the
theme and the last good upload.

## Modules

- **table**: `Table` and `Value`, the in-memory data model
- **loader**: JSON / CSV / XLSX decoding
- **dates**: `Date` column coercion
- **filter**: `Filters`, `FilterOptions`, `filter`
- **aggregate**: `Summary` and `aggregate`
- **graph**: chart descriptions and PNG rendering
- **downloader**: CSV, XLSX and PNG exports
- **dashboard**: the per-interaction render and KPI formatting
- **session**: per-user theme and upload
- **app** (feature `web`): the HTTP page and its routes
- **config** (feature `web`): server settings
*/

pub mod aggregate;
pub mod dashboard;
pub mod dates;
pub mod downloader;
pub mod error;
pub mod filter;
pub mod graph;
pub mod loader;
pub mod session;
pub mod table;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod config;

pub use aggregate::{Summary, aggregate};
pub use dashboard::{DashboardState, render};
pub use dates::normalize;
pub use downloader::{export_chart_image, export_csv};
pub use error::{DashboardError, DateParseError, Result};
pub use filter::{FilterOptions, FilterSelection, Filters, filter};
pub use loader::load;
pub use session::{Session, Theme};
pub use table::{Table, Value};
