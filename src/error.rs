use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the hosted chat-completion API.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing API key")]
    MissingCredential,
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("chat completion failed with status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed chat completion response: {0}")]
    MalformedResponse(String),
}

/// Prompt refinement failed. Fatal for the interaction.
#[derive(Debug, Error)]
#[error("prompt refinement failed: {0}")]
pub struct RefineError(#[from] pub LlmError);

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataset has no columns")]
    Empty,
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

/// Failures raised by the query executor. Surfaced to the user, never fatal.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Llm(#[from] LlmError),
    #[error("could not parse query plan: {0}")]
    InvalidPlan(String),
    #[error("{0}")]
    Unsupported(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("column '{0}' is not numeric")]
    NotNumeric(String),
    #[error("aggregate '{0}' needs a column")]
    MissingColumn(String),
    #[error("a chart needs a group_by column")]
    ChartWithoutGroups,
    #[error("no rows matched the filters")]
    NoRows,
    #[error("failed to export chart: {0}")]
    ChartExport(#[from] ChartError),
}

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("Chart image file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Image(#[from] image::ImageError),
    #[error("nothing to plot")]
    NoPoints,
}
