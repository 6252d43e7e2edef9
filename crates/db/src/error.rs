//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("row not found")]
    NotFound,

    /// A write touched a different number of rows than required.
    #[error("{operation} affected {actual} rows, expected {expected}")]
    RowCount {
        operation: &'static str,
        expected: u64,
        actual: u64,
    },

    /// A row with the same id already exists.
    #[error("duplicate id {0}")]
    Duplicate(uuid::Uuid),

    #[error("transaction already finished")]
    Finished,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Fail unless exactly `expected` rows were touched.
    pub fn ensure_rows(operation: &'static str, expected: u64, actual: u64) -> Result<(), DbError> {
        if actual == expected {
            Ok(())
        } else {
            Err(DbError::RowCount { operation, expected, actual })
        }
    }
}
