use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Storage(#[from] nexus_storage::StorageError),
    #[error("unknown subject type in stored tuple: {0}")]
    InvalidSubjectType(String),
}
