use thiserror::Error;

pub type Result<T> = std::result::Result<T, TigerError>;

#[derive(Debug, Error)]
pub enum TigerError {
    #[error(transparent)]
    Storage(#[from] nexus_storage::StorageError),

    #[error("bitmap deserialization failed: {0}")]
    Corrupt(String),

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
}
