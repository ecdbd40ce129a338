use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
