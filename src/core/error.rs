use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("cannot reach the task database: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("task query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("table {table} is missing expected columns: {}", missing.join(", "))]
    Schema { table: String, missing: Vec<String> },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} already exists; rerun with --replace to overwrite it", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid window: start {start} is after end {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },

    #[error("invalid task data: {0}")]
    InvalidData(String),
}

impl ReportError {
    /// Map a sqlx error raised while a query was in flight.
    ///
    /// Transport failures mean the datastore went away, not that the query was wrong.
    pub fn from_query(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => ReportError::Connection(err),
            other => ReportError::Query(other),
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReportError::Write {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReportError::Connection(_) => "connection",
            ReportError::Query(_) | ReportError::Schema { .. } => "query",
            ReportError::Write { .. } | ReportError::AlreadyExists { .. } => "write",
            ReportError::Csv(_) => "csv",
            ReportError::Config(_) => "config",
            ReportError::InvalidWindow { .. } => "window",
            ReportError::InvalidData(_) => "data",
        }
    }
}
