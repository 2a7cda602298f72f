//! Permission cache layers: in-process L1 and distributed L2. The Tiger
//! Bitmap Cache and the invalidation fabric that drives all three layers
//! live in `nexus-tiger` and `nexus-invalidation` respectively; this crate
//! only covers the per-check caches.

pub mod config;
pub mod error;
pub mod key;
pub mod l1;
pub mod l2;

pub use config::{InvalidationMode, PermissionCacheConfig};
pub use error::{CacheError, Result};
pub use key::CacheKey;
pub use l1::{CacheStats, PermissionCache};
pub use l2::{DistributedCache, DistributedCacheConfig};
