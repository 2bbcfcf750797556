use crate::ai::AiClient;
use crate::conn::ConnectConfig;
use crate::db::DbClient;
use crate::factory::{ServiceClient, ServiceClientFactory};
use ahnlich_pool::{KeyedClientPool, PoolConfig, PoolError};
use std::ops::Deref;
use tracing::Span;

/// A [`KeyedClientPool`] of one kind of ahnlich client, keyed by server address
///
/// Derefs to the underlying pool, so borrowing reads the same as on the generic pool:
///
/// ```ignore
/// let pool = DbClientPool::new(PoolConfig::default(), ConnectConfig::default()).await?;
/// let client = pool.borrow("127.0.0.1:1369").await?;
/// pool.return_client("127.0.0.1:1369", client).await?;
/// ```
#[derive(Debug)]
pub struct TypedClientPool<C: ServiceClient> {
    pool: KeyedClientPool<ServiceClientFactory<C>>,
}

pub type DbClientPool = TypedClientPool<DbClient>;
pub type AiClientPool = TypedClientPool<AiClient>;

impl<C: ServiceClient> Clone for TypedClientPool<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<C: ServiceClient> TypedClientPool<C> {
    pub async fn new(
        pool_config: PoolConfig,
        connect_config: ConnectConfig,
    ) -> Result<Self, PoolError> {
        let span = tracing::info_span!("client_pool", service = C::SERVICE);
        Self::with_span(pool_config, connect_config, span).await
    }

    /// Same as [`Self::new`], logging within `span`
    pub async fn with_span(
        pool_config: PoolConfig,
        connect_config: ConnectConfig,
        span: Span,
    ) -> Result<Self, PoolError> {
        let pool = KeyedClientPool::builder(ServiceClientFactory::new(connect_config))
            .config(pool_config)
            .span(span)
            .build()
            .await?;
        Ok(Self { pool })
    }

    pub fn into_inner(self) -> KeyedClientPool<ServiceClientFactory<C>> {
        self.pool
    }
}

impl<C: ServiceClient> Deref for TypedClientPool<C> {
    type Target = KeyedClientPool<ServiceClientFactory<C>>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}
