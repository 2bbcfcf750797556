mod pooled;
mod state;

pub use pooled::PooledClient;
pub use state::PoolStats;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::evictor::Evictor;
use crate::factory::ClientFactory;
use futures::FutureExt;
use pooled::{Shared, SlotReservation};
use state::{IdleClient, PoolState, Reserve};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use task_manager::TaskManager;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

/// Outcome of a single eviction sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Idle clients destroyed for being idle too long
    pub evicted: usize,
    /// Idle clients destroyed for failing validation, only with `test_while_idle`
    pub failed_validation: usize,
    /// Idle clients created to bring keys back up to `min_idle_per_key`
    pub created: usize,
}

pub(crate) struct PoolInner<F: ClientFactory> {
    factory: F,
    config: PoolConfig,
    shared: Arc<Shared<F::Client>>,
    span: Span,
    task_manager: TaskManager,
    evictor_shutdown: CancellationToken,
}

impl<F: ClientFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        // a running sweep holds a strong reference, so this only ever interrupts the sleep
        self.evictor_shutdown.cancel();
    }
}

enum Step<C> {
    Idle(IdleClient<C>),
    Create(Option<(String, IdleClient<C>)>),
    Wait,
}

/// A keyed pool of clients built by a [`ClientFactory`]
///
/// Every key (usually a server address) gets its own sub-pool, bounded by
/// `max_total_per_key`, while all keys together are bounded by `max_total`. Cheap to clone,
/// clones share the same pool.
///
/// ```ignore
/// let pool = KeyedClientPool::new(factory, PoolConfig::default()).await?;
/// let client = pool.borrow("127.0.0.1:1369").await?;
/// // use the client
/// pool.return_client("127.0.0.1:1369", client).await?;
/// pool.close().await;
/// ```
pub struct KeyedClientPool<F: ClientFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ClientFactory> Clone for KeyedClientPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ClientFactory> fmt::Debug for KeyedClientPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedClientPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builds a [`KeyedClientPool`], letting callers inject the span the pool logs under
pub struct KeyedClientPoolBuilder<F: ClientFactory> {
    factory: F,
    config: PoolConfig,
    span: Option<Span>,
}

impl<F: ClientFactory> KeyedClientPoolBuilder<F> {
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Every event the pool emits is recorded within this span
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validates the configuration and starts the eviction task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(self) -> Result<KeyedClientPool<F>, PoolError> {
        self.config.validate()?;
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("client_pool"));
        let task_manager = TaskManager::new();
        let evictor_shutdown = task_manager.cancellation_token().child_token();
        let inner = Arc::new(PoolInner {
            factory: self.factory,
            shared: Arc::new(Shared::new(PoolState::new(self.config.clone()))),
            config: self.config,
            span,
            task_manager,
            evictor_shutdown,
        });
        let interval = inner.config.eviction_polling_interval;
        if !interval.is_zero() {
            let evictor = Evictor::new(
                Arc::downgrade(&inner),
                interval,
                inner.evictor_shutdown.clone(),
            );
            inner.task_manager.spawn_task_loop(evictor).await;
        }
        Ok(KeyedClientPool { inner })
    }
}

impl<F: ClientFactory> KeyedClientPool<F> {
    pub fn builder(factory: F) -> KeyedClientPoolBuilder<F> {
        KeyedClientPoolBuilder {
            factory,
            config: PoolConfig::default(),
            span: None,
        }
    }

    pub async fn new(factory: F, config: PoolConfig) -> Result<Self, PoolError> {
        Self::builder(factory).config(config).build().await
    }

    pub(crate) fn from_inner(inner: Arc<PoolInner<F>>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Checks out a client for `key`
    ///
    /// Hands out an idle client when there is one, otherwise creates a new one if the caps
    /// allow. When they don't, waits up to `max_block_wait` for capacity if
    /// `block_when_exhausted` is set and fails with [`PoolError::Exhausted`] otherwise.
    /// Dropping the returned future while it waits releases anything it had reserved.
    pub async fn borrow(&self, key: &str) -> Result<PooledClient<F::Client>, PoolError> {
        self.borrow_inner(key)
            .instrument(self.inner.span.clone())
            .await
    }

    async fn borrow_inner(&self, key: &str) -> Result<PooledClient<F::Client>, PoolError> {
        let shared = &self.inner.shared;
        let config = &self.inner.config;
        let deadline = config
            .block_when_exhausted
            .then(|| tokio::time::Instant::now() + config.max_block_wait);

        loop {
            // registered before looking at the state so a release in between is not missed
            let notified = shared.capacity().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut state = shared.lock();
                if state.is_closed() {
                    return Err(PoolError::Closed);
                }
                match state.claim_idle(key) {
                    Some(idle) => Step::Idle(idle),
                    None => match state.reserve(key, true) {
                        Reserve::Granted => Step::Create(None),
                        Reserve::Reclaimed(victim_key, victim) => {
                            Step::Create(Some((victim_key, victim)))
                        }
                        Reserve::Exhausted => Step::Wait,
                    },
                }
            };

            match step {
                Step::Idle(idle) => {
                    let client = PooledClient::checked_out(idle, key, shared);
                    if config.test_on_borrow && !self.validate(key, &client).await {
                        tracing::debug!(
                            key,
                            id = client.id(),
                            "Idle client failed validation on borrow"
                        );
                        self.discard(client, true).await;
                        continue;
                    }
                    tracing::debug!(key, id = client.id(), "Borrowed idle client");
                    return Ok(client);
                }
                Step::Create(victim) => {
                    let reservation = SlotReservation::new(shared, key);
                    if let Some((victim_key, victim)) = victim {
                        tracing::debug!(
                            key = %victim_key,
                            id = victim.id,
                            "Reclaiming idle client to make room under the global cap"
                        );
                        self.destroy(&victim_key, victim.client).await;
                    }
                    let client = match self.inner.factory.create(key).await {
                        Ok(client) => client,
                        Err(err) => {
                            shared.lock().record_creation_failure();
                            tracing::warn!(key, error = %err, "Could not create client");
                            return Err(PoolError::creation(key, err));
                        }
                    };
                    return match reservation.install_active(client) {
                        Ok(client) => {
                            tracing::debug!(key, id = client.id(), "Created client");
                            Ok(client)
                        }
                        Err(client) => {
                            self.destroy(key, client).await;
                            Err(PoolError::Closed)
                        }
                    };
                }
                Step::Wait => {
                    let Some(deadline) = deadline else {
                        return Err(PoolError::Exhausted {
                            key: key.to_string(),
                            waited: None,
                        });
                    };
                    tracing::trace!(key, "Pool exhausted, waiting for capacity");
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(PoolError::Exhausted {
                            key: key.to_string(),
                            waited: Some(config.max_block_wait),
                        });
                    }
                }
            }
        }
    }

    /// Hands a borrowed client back to the pool
    ///
    /// With `test_on_return` the client is validated first and destroyed if it fails. It is
    /// also destroyed when the key already holds `max_idle_per_key` idle clients or the pool is
    /// closed. A client that is not active in this pool under `key` is discarded and reported
    /// as [`PoolError::ForeignClient`].
    pub async fn return_client(
        &self,
        key: &str,
        client: PooledClient<F::Client>,
    ) -> Result<(), PoolError> {
        self.return_inner(key, client)
            .instrument(self.inner.span.clone())
            .await
    }

    async fn return_inner(
        &self,
        key: &str,
        client: PooledClient<F::Client>,
    ) -> Result<(), PoolError> {
        self.ensure_active(key, &client)?;
        let shared = &self.inner.shared;

        let closed = shared.lock().is_closed();
        if closed {
            tracing::debug!(key, id = client.id(), "Pool closed, destroying returned client");
            self.discard(client, false).await;
            return Ok(());
        }
        if self.inner.config.test_on_return && !self.validate(key, &client).await {
            tracing::debug!(key, id = client.id(), "Client failed validation on return");
            self.discard(client, true).await;
            return Ok(());
        }

        let id = client.id();
        let Some(idle) = client.into_idle(Instant::now()) else {
            return Ok(());
        };
        let checked_in = shared.lock().check_in(key, idle);
        shared.notify();
        match checked_in {
            Ok(()) => tracing::debug!(key, id, "Returned client to the pool"),
            Err(client) => {
                tracing::debug!(key, id, "No room for another idle client, destroying");
                self.destroy(key, client).await;
            }
        }
        Ok(())
    }

    /// Destroys a borrowed client the caller found to be broken, freeing its slot
    pub async fn invalidate(
        &self,
        key: &str,
        client: PooledClient<F::Client>,
    ) -> Result<(), PoolError> {
        self.invalidate_inner(key, client)
            .instrument(self.inner.span.clone())
            .await
    }

    async fn invalidate_inner(
        &self,
        key: &str,
        client: PooledClient<F::Client>,
    ) -> Result<(), PoolError> {
        self.ensure_active(key, &client)?;
        tracing::debug!(key, id = client.id(), "Invalidating client");
        self.discard(client, false).await;
        Ok(())
    }

    fn ensure_active(&self, key: &str, client: &PooledClient<F::Client>) -> Result<(), PoolError> {
        let shared = &self.inner.shared;
        let active = client.belongs_to(shared)
            && client.key() == key
            && shared.lock().is_active(key, client.id());
        if !active {
            tracing::warn!(key, id = client.id(), "Client is not active in this pool");
            return Err(PoolError::ForeignClient {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Runs one eviction sweep, the background evictor calls this every
    /// `eviction_polling_interval`
    ///
    /// Idle clients past `min_evictable_idle_duration` are claimed under the lock and only then
    /// destroyed, so a concurrent borrow can never be handed a client that is being evicted.
    pub async fn evict(&self) -> EvictionReport {
        self.evict_inner()
            .instrument(self.inner.span.clone())
            .await
    }

    async fn evict_inner(&self) -> EvictionReport {
        let shared = &self.inner.shared;
        let mut report = EvictionReport::default();

        let evictable = {
            let mut state = shared.lock();
            if state.is_closed() {
                return report;
            }
            state.take_evictable(Instant::now())
        };
        if !evictable.is_empty() {
            shared.notify();
        }
        for (key, idle) in evictable {
            tracing::debug!(key = %key, id = idle.id, "Evicting idle client");
            self.destroy(&key, idle.client).await;
            report.evicted += 1;
        }

        if self.inner.config.test_while_idle {
            report.failed_validation = self.test_idle_clients().await;
        }
        report.created = self.ensure_min_idle().await;
        report
    }

    async fn test_idle_clients(&self) -> usize {
        let shared = &self.inner.shared;
        let probes: Vec<_> = shared
            .lock()
            .claim_idle_for_probe()
            .into_iter()
            .map(|(key, idle)| (SlotReservation::warming(shared, key.clone()), key, idle))
            .collect();

        let mut failed = 0;
        for (reservation, key, idle) in probes {
            if self.validate(&key, &idle.client).await {
                if let Err(client) = reservation.restore_idle(idle) {
                    self.destroy(&key, client).await;
                }
            } else {
                tracing::debug!(key = %key, id = idle.id, "Idle client failed validation");
                reservation.discard_invalid();
                self.destroy(&key, idle.client).await;
                failed += 1;
            }
        }
        failed
    }

    async fn ensure_min_idle(&self) -> usize {
        if self.inner.config.min_idle_per_key == 0 {
            return 0;
        }
        let keys = self.inner.shared.lock().keys();
        let mut created = 0;
        for key in keys {
            match self.fill_idle(&key).await {
                Ok(count) => created += count,
                Err(PoolError::Closed) => break,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Could not top up idle clients")
                }
            }
        }
        created
    }

    /// Eagerly creates idle clients for `key` until it holds `min_idle_per_key` of them or a
    /// cap is reached, returning how many were created
    pub async fn prepare(&self, key: &str) -> Result<usize, PoolError> {
        self.fill_idle(key)
            .instrument(self.inner.span.clone())
            .await
    }

    async fn fill_idle(&self, key: &str) -> Result<usize, PoolError> {
        let shared = &self.inner.shared;
        let min_idle = self.inner.config.min_idle_per_key;
        let mut created = 0;
        loop {
            let reservation = {
                let mut state = shared.lock();
                if state.is_closed() {
                    return Err(PoolError::Closed);
                }
                // slots reserved by borrowers become active, so only warming ones count
                if state.idle_count(key) + state.warming_count(key) >= min_idle {
                    break;
                }
                if !state.reserve_warm(key) {
                    break;
                }
                SlotReservation::warming(shared, key)
            };
            let client = match self.inner.factory.create(key).await {
                Ok(client) => client,
                Err(err) => {
                    shared.lock().record_creation_failure();
                    return Err(PoolError::creation(key, err));
                }
            };
            if let Err(client) = reservation.install_idle(client) {
                self.destroy(key, client).await;
                return Err(PoolError::Closed);
            }
            tracing::debug!(key, "Created idle client");
            created += 1;
        }
        Ok(created)
    }

    /// Destroys every idle client, checked out clients are left alone
    pub async fn clear(&self) {
        self.clear_idle(None)
            .instrument(self.inner.span.clone())
            .await
    }

    /// Destroys the idle clients of `key`, checked out clients are left alone
    pub async fn clear_key(&self, key: &str) {
        self.clear_idle(Some(key))
            .instrument(self.inner.span.clone())
            .await
    }

    async fn clear_idle(&self, key: Option<&str>) {
        let drained = self.inner.shared.lock().drain_idle(key);
        self.inner.shared.notify();
        for (key, idle) in drained {
            self.destroy(&key, idle.client).await;
        }
    }

    /// Closes the pool for good
    ///
    /// Idle clients are destroyed, blocked and future borrows fail with [`PoolError::Closed`]
    /// and clients still checked out are destroyed once returned. Waits for an eviction sweep
    /// that is already running to finish destroying what it claimed.
    pub async fn close(&self) {
        self.close_inner()
            .instrument(self.inner.span.clone())
            .await
    }

    async fn close_inner(&self) {
        let drained = {
            let mut state = self.inner.shared.lock();
            if state.is_closed() {
                return;
            }
            state.close()
        };
        self.inner.shared.notify();
        self.inner.evictor_shutdown.cancel();
        tracing::info!("Closing client pool, destroying {} idle clients", drained.len());
        for (key, idle) in drained {
            self.destroy(&key, idle.client).await;
        }
        self.inner.task_manager.wait().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.lock().is_closed()
    }

    pub fn idle_count(&self, key: &str) -> usize {
        self.inner.shared.lock().idle_count(key)
    }

    pub fn active_count(&self, key: &str) -> usize {
        self.inner.shared.lock().active_count(key)
    }

    pub fn total_idle_count(&self) -> usize {
        self.inner.shared.lock().total_idle()
    }

    pub fn total_active_count(&self) -> usize {
        self.inner.shared.lock().total_active()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.shared.lock().stats()
    }

    /// Fail-open: a probe that errors or panics keeps the client
    async fn validate(&self, key: &str, client: &F::Client) -> bool {
        match AssertUnwindSafe(self.inner.factory.validate(client))
            .catch_unwind()
            .await
        {
            Ok(Ok(valid)) => valid,
            Ok(Err(err)) => {
                tracing::warn!(key, error = %err, "Client validation errored, keeping client");
                true
            }
            Err(_) => {
                tracing::warn!(key, "Client validation panicked, keeping client");
                true
            }
        }
    }

    /// Frees the slot of an active client and destroys it
    async fn discard(&self, mut client: PooledClient<F::Client>, failed_validation: bool) {
        let key = client.key().to_string();
        let id = client.id();
        let Some(inner) = client.take() else {
            return;
        };
        {
            let mut state = self.inner.shared.lock();
            if failed_validation {
                state.record_validation_failure();
            }
            state.discard_active(&key, id);
        }
        self.inner.shared.notify();
        self.destroy(&key, inner).await;
    }

    /// Best effort: failures, panics and timeouts are logged and swallowed
    async fn destroy(&self, key: &str, client: F::Client) {
        let deadline = self.inner.config.destroy_timeout;
        let destroy = AssertUnwindSafe(self.inner.factory.destroy(client, deadline)).catch_unwind();
        match tokio::time::timeout(deadline, destroy).await {
            Ok(Ok(Ok(()))) => tracing::debug!(key, "Destroyed client"),
            Ok(Ok(Err(err))) => tracing::warn!(key, error = %err, "Failed to destroy client"),
            Ok(Err(_)) => tracing::warn!(key, "Client destroy panicked"),
            Err(_) => tracing::warn!(key, ?deadline, "Client destroy timed out"),
        }
    }
}
