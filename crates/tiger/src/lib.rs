//! Tiger Bitmap Cache: pre-materialized Roaring Bitmaps of accessible
//! resources per `(subject, permission, resource_type)`, with Directory
//! Grant pre-materialization for filesystem-shaped resource trees.

pub mod bitmap;
pub mod directory_grant;
pub mod error;
pub mod key;

pub use bitmap::TigerBitmapCache;
pub use directory_grant::{DirectoryGrantManager, EXPANSION_BATCH_SIZE};
pub use error::{Result, TigerError};
pub use key::TigerKey;
