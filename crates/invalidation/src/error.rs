use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error(transparent)]
    Storage(#[from] nexus_storage::StorageError),
    #[error(transparent)]
    Tiger(#[from] nexus_tiger::TigerError),
}

pub type Result<T> = std::result::Result<T, InvalidationError>;
