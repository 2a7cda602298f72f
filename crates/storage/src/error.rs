use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("query build error: {0}")]
    QueryBuild(#[from] sea_query::error::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cross-tenant write rejected: {0}")]
    CrossTenant(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
