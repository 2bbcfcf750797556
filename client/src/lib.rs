//! A rust client for talking to ahnlich DB and AI
//!
//! Ships the db, ai, conn, error submodules along with pooled variants of both clients
//!
//! ## Pooling
//!
//! [`pool::DbClientPool`] and [`pool::AiClientPool`] keep a bounded number of connections per
//! server address for reuse across tasks. Both are thin wrappers over
//! [`ahnlich_pool::KeyedClientPool`] with a [`factory::ServiceClientFactory`] that opens the
//! connections.
//!
//! ```ignore
//! use ahnlich_client_rs::conn::ConnectConfig;
//! use ahnlich_client_rs::pool::DbClientPool;
//! use ahnlich_pool::PoolConfig;
//!
//! let pool = DbClientPool::new(
//!     PoolConfig::default().max_total_per_key(4),
//!     ConnectConfig::default(),
//! )
//! .await?;
//! let db_client = pool.borrow("127.0.0.1:1369").await?;
//! // build the generated db service stub on top of `db_client.channel()`
//! pool.return_client("127.0.0.1:1369", db_client).await?;
//! ```
//!
//! ## Single connections
//!
//! ```ignore
//! use ahnlich_client_rs::db::DbClient;
//!
//! let db_client = DbClient::new("127.0.0.1:1369".into()).await?;
//! assert!(db_client.is_ready(std::time::Duration::from_secs(1)).await);
//! ```
pub mod ai;
pub mod conn;
pub mod db;
pub mod error;
pub mod factory;
pub mod pool;
