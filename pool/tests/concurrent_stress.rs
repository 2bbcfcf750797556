mod common;

use common::{config, pool};
use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tracks how many clients are in use at once and the highest value seen
#[derive(Default)]
struct InUse {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InUse {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifty_borrowers_never_exceed_per_key_cap() {
    let pool = pool(
        config()
            .max_total_per_key(5)
            .max_idle_per_key(5)
            .max_block_wait(Duration::from_secs(10)),
    )
    .await;
    let in_use = Arc::new(InUse::default());

    let tasks = (0..50).map(|_| {
        let pool = pool.clone();
        let in_use = Arc::clone(&in_use);
        tokio::spawn(async move {
            let client = pool.borrow("A").await?;
            in_use.enter();
            assert!(pool.active_count("A") <= 5);
            tokio::time::sleep(Duration::from_millis(5)).await;
            in_use.leave();
            pool.return_client("A", client).await
        })
    });

    for result in join_all(tasks).await {
        result.expect("task panicked").expect("borrow and return");
    }
    assert!(in_use.peak() <= 5, "peak in use was {}", in_use.peak());
    assert!(pool.factory().created() <= 5);
    assert_eq!(pool.active_count("A"), 0);
    assert_eq!(pool.stats().borrowed, 50);
    assert_eq!(pool.stats().returned, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_cap_holds_across_keys() {
    let pool = pool(
        config()
            .max_total(4)
            .max_total_per_key(4)
            .max_idle_per_key(4)
            .max_block_wait(Duration::from_secs(10)),
    )
    .await;
    let in_use = Arc::new(InUse::default());
    let keys = ["A", "B", "C", "D", "E"];

    let tasks = (0..40).map(|i| {
        let pool = pool.clone();
        let in_use = Arc::clone(&in_use);
        let key = keys[i % keys.len()];
        tokio::spawn(async move {
            let client = pool.borrow(key).await?;
            in_use.enter();
            tokio::time::sleep(Duration::from_millis(2)).await;
            in_use.leave();
            pool.return_client(key, client).await
        })
    });

    for result in join_all(tasks).await {
        result.expect("task panicked").expect("borrow and return");
    }
    assert!(in_use.peak() <= 4, "peak in use was {}", in_use.peak());
    assert_eq!(pool.total_active_count(), 0);
    assert!(pool.total_idle_count() <= 4);
    let stats = pool.stats();
    assert_eq!(stats.created - stats.destroyed, pool.total_idle_count() as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalidating_under_load_keeps_counts_consistent() {
    let pool = pool(
        config()
            .max_total_per_key(3)
            .max_idle_per_key(3)
            .max_block_wait(Duration::from_secs(10)),
    )
    .await;

    let tasks = (0..30).map(|i| {
        let pool = pool.clone();
        tokio::spawn(async move {
            let client = pool.borrow("A").await?;
            tokio::task::yield_now().await;
            match i % 3 {
                0 => pool.invalidate("A", client).await,
                1 => {
                    drop(client);
                    Ok(())
                }
                _ => pool.return_client("A", client).await,
            }
        })
    });

    for result in join_all(tasks).await {
        result.expect("task panicked").expect("borrow and release");
    }
    assert_eq!(pool.active_count("A"), 0);
    assert!(pool.idle_count("A") <= 3);
    let stats = pool.stats();
    assert_eq!(stats.created - stats.destroyed, pool.idle_count("A") as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweeping_under_load_never_hands_out_destroyed_clients() {
    let pool = pool(
        config()
            .max_total_per_key(5)
            .max_idle_per_key(5)
            .min_evictable_idle_duration(Duration::ZERO)
            .max_block_wait(Duration::from_secs(10)),
    )
    .await;
    let stop = Arc::new(AtomicBool::new(false));

    let sweeper = {
        let pool = pool.clone();
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            let mut evicted = 0;
            while !stop.load(Ordering::SeqCst) {
                evicted += pool.evict().await.evicted;
                tokio::task::yield_now().await;
            }
            evicted
        })
    };

    let tasks = (0..50).map(|_| {
        let pool = pool.clone();
        tokio::spawn(async move {
            let client = pool.borrow("A").await?;
            assert!(
                !pool.factory().is_destroyed(client.serial),
                "client {} was handed out after being destroyed",
                client.serial
            );
            tokio::task::yield_now().await;
            assert!(!pool.factory().is_destroyed(client.serial));
            pool.return_client("A", client).await
        })
    });

    for result in join_all(tasks).await {
        result.expect("task panicked").expect("borrow and return");
    }
    stop.store(true, Ordering::SeqCst);
    let evicted = sweeper.await.expect("sweeper panicked");

    let factory = pool.factory();
    assert_eq!(pool.active_count("A"), 0);
    assert_eq!(factory.created() - factory.destroyed(), pool.idle_count("A"));
    assert_eq!(pool.stats().evicted as usize, evicted);
}
