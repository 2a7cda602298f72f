//! Concurrency glue shared by every layer above storage: singleflight,
//! per-key write locks, the async circuit breaker in front of the
//! relational store, a thread-pool bridge for synchronous callers, and
//! cancellation propagation.

pub mod bridge;
pub mod cancellation;
pub mod circuit_breaker;
pub mod keyed_mutex;
pub mod singleflight;

pub use bridge::{block_on_handle, run_blocking, BridgeError};
pub use cancellation::{CancellationToken, Cancelled};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitCallError, CircuitState};
pub use keyed_mutex::KeyedMutex;
pub use singleflight::SingleFlightGroup;
