//! Keyed client connection pool used by the ahnlich rust clients
//!
//! A [`KeyedClientPool`] keeps a bounded set of live clients for every key (usually the address
//! of an ahnlich DB or AI server). Clients are built, validated and torn down through a
//! [`ClientFactory`], idle clients are swept by a background task and callers may block for a
//! bounded time when a key is exhausted.
//!
//! ```ignore
//! use ahnlich_pool::{KeyedClientPool, PoolConfig};
//!
//! let config = PoolConfig::default()
//!     .max_total_per_key(4)
//!     .block_when_exhausted(false);
//! let pool = KeyedClientPool::new(factory, config).await?;
//! let client = pool.borrow("127.0.0.1:1369").await?;
//! pool.return_client("127.0.0.1:1369", client).await?;
//! ```
//!
//! ## Observability
//!
//! The pool logs through `tracing` within the span handed to
//! [`KeyedClientPoolBuilder::span`], falling back to a `client_pool` span.
pub mod config;
pub mod error;
mod evictor;
pub mod factory;
mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use factory::ClientFactory;
pub use pool::{EvictionReport, KeyedClientPool, KeyedClientPoolBuilder, PoolStats, PooledClient};
