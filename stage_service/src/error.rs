//! Error Types
//!
//! `StageError` is what every write and read path returns. Validation failures
//! are user errors and carry the full field error set; everything else is a
//! server fault.

use thiserror::Error;

use crate::database::DatabaseError;
use crate::validation::ValidationErrors;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<ValidationErrors> for StageError {
    fn from(errors: ValidationErrors) -> Self {
        StageError::Validation(errors)
    }
}

impl From<sqlx::Error> for StageError {
    fn from(err: sqlx::Error) -> Self {
        StageError::Database(DatabaseError::from(err))
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        StageError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for StageError {
    fn from(err: serde_yaml::Error) -> Self {
        StageError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StageError>;
