use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EpiError {
    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to load lookup table {path}: {message}")]
    Lookup { path: String, message: String },

    #[error("failed to read extract {path}: {message}")]
    ExtractRead { path: String, message: String },

    #[error("malformed extract {path}: {message}")]
    MalformedExtract { path: String, message: String },

    #[error("extract download failed: {0}")]
    FetchHttp(String),

    #[error("extract download returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("data.gov.gr request failed: {0}")]
    GovGrHttp(String),

    #[error("data.gov.gr returned status {status}: {message}")]
    GovGrStatus { status: u16, message: String },

    #[error("missing API token for source {0}")]
    MissingToken(String),

    #[error("document sink failure: {0}")]
    Sink(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
