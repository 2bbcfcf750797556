use crate::factory::ClientFactory;
use crate::pool::{KeyedClientPool, PoolInner};
use std::sync::Weak;
use std::time::Duration;
use task_manager::{Task, TaskState};
use tokio_util::sync::CancellationToken;

/// Background task sweeping a pool every `eviction_polling_interval`
///
/// Only holds a weak reference so that dropping every pool handle also ends the task. The
/// shutdown token interrupts the sleep between sweeps, never a sweep in progress, so clients a
/// sweep has claimed always reach the factory's `destroy`.
pub(crate) struct Evictor<F: ClientFactory> {
    pool: Weak<PoolInner<F>>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl<F: ClientFactory> Evictor<F> {
    pub(crate) fn new(
        pool: Weak<PoolInner<F>>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            interval,
            shutdown,
        }
    }
}

#[async_trait::async_trait]
impl<F: ClientFactory> Task for Evictor<F> {
    fn task_name(&self) -> String {
        "client-pool-evictor".to_string()
    }

    async fn run(&self) -> TaskState {
        tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => return TaskState::Break,
            _ = tokio::time::sleep(self.interval) => {}
        }
        let Some(inner) = self.pool.upgrade() else {
            return TaskState::Break;
        };
        let pool = KeyedClientPool::from_inner(inner);
        if pool.is_closed() {
            return TaskState::Break;
        }
        let report = pool.evict().await;
        tracing::trace!(?report, "Eviction sweep done");
        TaskState::Continue
    }
}
