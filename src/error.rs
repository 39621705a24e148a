use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ScrnaError {
    #[error("invalid dataset name: {0}")]
    InvalidDatasetName(String),

    #[error("invalid dataset version: {0}")]
    InvalidVersion(String),

    #[error("invalid dataset path: {0}")]
    InvalidPath(String),

    #[error("invalid search query: {0}")]
    InvalidQuery(String),

    #[error("failed to parse search query at offset {offset}: {message}")]
    QuerySyntax { offset: usize, message: String },

    #[error("multiple paths available for {dataset}; choose one of: {}", .paths.join(", "))]
    #[diagnostic(help("pass a path to select one sub-dataset"))]
    AmbiguousPath { dataset: String, paths: Vec<String> },

    #[error("nested alternative experiments are forbidden: {0}")]
    NestedAlternativeExperiment(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("path {path} not found in dataset {dataset}")]
    PathNotFound { dataset: String, path: String },

    #[error("file not found on the backend: {0}")]
    FileNotFound(String),

    #[error("gypsum request failed: {0}")]
    GypsumHttp(String),

    #[error("gypsum returned status {status}: {message}")]
    GypsumStatus { status: u16, message: String },

    #[error("metadata index request failed: {0}")]
    IndexHttp(String),

    #[error("metadata index returned status {status}: {message}")]
    IndexStatus { status: u16, message: String },

    #[error("metadata index query failed: {0}")]
    IndexQuery(String),

    #[error("malformed manifest: {0}")]
    Manifest(String),

    #[error("malformed metadata: {0}")]
    Metadata(String),

    #[error("malformed object at {path}: {message}")]
    Object { path: String, message: String },

    #[error("{context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

/// Coarse error classes callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Transport,
    Schema,
    Io,
}

impl ScrnaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrnaError::InvalidDatasetName(_)
            | ScrnaError::InvalidVersion(_)
            | ScrnaError::InvalidPath(_)
            | ScrnaError::InvalidQuery(_)
            | ScrnaError::QuerySyntax { .. }
            | ScrnaError::AmbiguousPath { .. }
            | ScrnaError::NestedAlternativeExperiment(_) => ErrorKind::Validation,
            ScrnaError::DatasetNotFound(_)
            | ScrnaError::PathNotFound { .. }
            | ScrnaError::FileNotFound(_) => ErrorKind::NotFound,
            ScrnaError::GypsumHttp(_)
            | ScrnaError::GypsumStatus { .. }
            | ScrnaError::IndexHttp(_)
            | ScrnaError::IndexStatus { .. } => ErrorKind::Transport,
            ScrnaError::Manifest(_)
            | ScrnaError::Metadata(_)
            | ScrnaError::Object { .. }
            | ScrnaError::DimensionMismatch { .. } => ErrorKind::Schema,
            ScrnaError::IndexQuery(_)
            | ScrnaError::ConfigRead(_)
            | ScrnaError::ConfigParse(_)
            | ScrnaError::Filesystem(_) => ErrorKind::Io,
        }
    }
}
