//! Error types for sqlite-vector-search

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid vector blob: {0}")]
    InvalidVectorFormat(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index is full: max_elements is {max_elements}")]
    CapacityExceeded { max_elements: usize },

    #[error("rowid {0} already present in index")]
    DuplicateRowid(i64),

    #[error("No vector with label {0}")]
    NotFound(i64),

    #[error("Operation not supported")]
    UnsupportedOperation,
}

pub type Result<T> = std::result::Result<T, Error>;
