#![allow(dead_code)]

use ahnlich_pool::{ClientFactory, KeyedClientPool, PoolConfig};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, PartialEq, Eq)]
pub struct MockClient {
    pub serial: usize,
    pub target: String,
}

#[derive(Error, Debug)]
pub enum MockError {
    #[error("connection refused by {0}")]
    Refused(String),
    #[error("probe failed")]
    Probe,
    #[error("teardown failed")]
    Teardown,
}

/// Factory handing out numbered clients, with switches to make each hook misbehave
#[derive(Debug, Default)]
pub struct MockFactory {
    pub created: AtomicUsize,
    pub destroy_started: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub validations: AtomicUsize,
    pub refuse: AtomicBool,
    pub probe_errors: AtomicBool,
    pub probe_panics: AtomicBool,
    pub destroy_errors: AtomicBool,
    pub create_delay_ms: AtomicU64,
    pub destroy_delay_ms: AtomicU64,
    invalid: Mutex<HashSet<usize>>,
    destroyed_serials: Mutex<HashSet<usize>>,
}

impl MockFactory {
    pub fn mark_invalid(&self, serial: usize) {
        self.invalid.lock().unwrap().insert(serial);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self, serial: usize) -> bool {
        self.destroyed_serials.lock().unwrap().contains(&serial)
    }
}

#[async_trait::async_trait]
impl ClientFactory for MockFactory {
    type Client = MockClient;
    type Error = MockError;

    async fn create(&self, key: &str) -> Result<MockClient, MockError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(MockError::Refused(key.to_string()));
        }
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockClient {
            serial,
            target: key.to_string(),
        })
    }

    async fn destroy(&self, client: MockClient, _deadline: Duration) -> Result<(), MockError> {
        self.destroy_started.fetch_add(1, Ordering::SeqCst);
        self.destroyed_serials.lock().unwrap().insert(client.serial);
        let delay = self.destroy_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        if self.destroy_errors.load(Ordering::SeqCst) {
            return Err(MockError::Teardown);
        }
        Ok(())
    }

    async fn validate(&self, client: &MockClient) -> Result<bool, MockError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if self.probe_panics.load(Ordering::SeqCst) {
            panic!("probe exploded");
        }
        if self.probe_errors.load(Ordering::SeqCst) {
            return Err(MockError::Probe);
        }
        Ok(!self.invalid.lock().unwrap().contains(&client.serial))
    }
}

/// Defaults with the background sweep turned off so tests drive eviction themselves
pub fn config() -> PoolConfig {
    PoolConfig::default().eviction_polling_interval(Duration::ZERO)
}

pub async fn pool(config: PoolConfig) -> KeyedClientPool<MockFactory> {
    KeyedClientPool::new(MockFactory::default(), config)
        .await
        .expect("Could not build pool")
}
