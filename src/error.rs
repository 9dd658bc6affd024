/// Everything that can stop a dashboard interaction
///
/// Load, normalize, filter and aggregate failures abort the whole render.
/// `Render` and `Export` only ever come out of an export action and are kept
/// apart from the rendered dashboard by the caller.
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("could not read the {format} file: {reason}")]
    Decode { format: String, reason: String },
    #[error(transparent)]
    DateParse(#[from] DateParseError),
    #[error("no rows match the current filters")]
    EmptyAggregation,
    #[error("could not render chart: {0}")]
    Render(String),
    #[error("could not export table: {0}")]
    Export(String),
    #[error("required column `{0}` is missing")]
    MissingColumn(String),
    #[error("column `{column}` row {row}: `{value}` is not a number")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },
}

/// Why the `Date` column could not be turned into calendar dates
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DateParseError {
    #[error("the file has no `Date` column")]
    MissingColumn,
    #[error("row {row}: cannot read `{value}` as a date")]
    Unparseable { row: usize, value: String },
}

impl DashboardError {
    pub(crate) fn decode(format: &str, reason: impl ToString) -> Self {
        DashboardError::Decode {
            format: format.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
