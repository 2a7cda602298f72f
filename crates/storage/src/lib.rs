//! Storage Bridge — the only crate in the workspace that talks SQL.
//! Everything above this depends on it; it depends on nothing else in the
//! workspace beyond `nexus-models`.

pub mod connection;
pub mod directory_grant_repository;
pub mod error;
pub mod namespace_repository;
pub mod refresh_token_repository;
pub mod resource_map_repository;
pub mod revision_repository;
pub mod tiger_repository;
pub mod tuple_repository;

pub use connection::{Database, DatabaseConfig};
pub use directory_grant_repository::DirectoryGrantRepository;
pub use error::{Result, StorageError};
pub use namespace_repository::NamespaceRepository;
pub use refresh_token_repository::RefreshTokenRepository;
pub use resource_map_repository::ResourceMapRepository;
pub use revision_repository::RevisionRepository;
pub use tiger_repository::TigerRepository;
pub use tuple_repository::{TupleFilter, TupleRepository, WriteTupleInput};
