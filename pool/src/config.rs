use crate::error::PoolError;
use clap::{ArgAction, Args};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sizing and eviction policy for a [`crate::KeyedClientPool`]
///
/// Can be flattened into a binary's clap config, all flags are prefixed with `--pool-` and
/// durations are taken in milliseconds
#[derive(Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of clients across all keys
    #[arg(long = "pool-max-total", default_value_t = 50)]
    pub max_total: usize,

    /// Maximum number of clients (idle and active) for a single key
    #[arg(long = "pool-max-total-per-key", default_value_t = 10)]
    pub max_total_per_key: usize,

    /// Clients returned while a key already holds this many idle clients are destroyed
    #[arg(long = "pool-max-idle-per-key", default_value_t = 5)]
    pub max_idle_per_key: usize,

    /// Eviction never takes a key below this many idle clients
    #[arg(long = "pool-min-idle-per-key", default_value_t = 0)]
    pub min_idle_per_key: usize,

    /// Wait for capacity instead of failing straight away when a key is exhausted
    #[arg(long = "pool-block-when-exhausted", action = ArgAction::Set, default_value_t = true)]
    pub block_when_exhausted: bool,

    /// Longest time a borrow waits for capacity when blocking
    #[arg(long = "pool-max-block-wait-ms", value_parser = parse_millis, default_value = "3000")]
    pub max_block_wait: Duration,

    /// Validate idle clients before handing them out
    #[arg(long = "pool-test-on-borrow", action = ArgAction::Set, default_value_t = false)]
    pub test_on_borrow: bool,

    /// Validate clients as they are returned
    #[arg(long = "pool-test-on-return", action = ArgAction::Set, default_value_t = true)]
    pub test_on_return: bool,

    /// Validate idle clients on every eviction sweep
    #[arg(long = "pool-test-while-idle", action = ArgAction::Set, default_value_t = false)]
    pub test_while_idle: bool,

    /// Period of the background eviction sweep, 0 turns the sweep off
    #[arg(long = "pool-eviction-interval-ms", value_parser = parse_millis, default_value = "60000")]
    pub eviction_polling_interval: Duration,

    /// Idle clients older than this may be evicted
    #[arg(
        long = "pool-min-evictable-idle-ms",
        value_parser = parse_millis,
        default_value = "10000"
    )]
    pub min_evictable_idle_duration: Duration,

    /// Deadline handed to the factory when destroying a client
    #[arg(long = "pool-destroy-timeout-ms", value_parser = parse_millis, default_value = "3000")]
    pub destroy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 50,
            max_total_per_key: 10,
            max_idle_per_key: 5,
            min_idle_per_key: 0,
            block_when_exhausted: true,
            max_block_wait: Duration::from_secs(3),
            test_on_borrow: false,
            test_on_return: true,
            test_while_idle: false,
            eviction_polling_interval: Duration::from_secs(60),
            min_evictable_idle_duration: Duration::from_secs(10),
            destroy_timeout: Duration::from_secs(3),
        }
    }
}

impl PoolConfig {
    /// Checks `min_idle_per_key <= max_idle_per_key <= max_total_per_key <= max_total`
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_idle_per_key > self.max_idle_per_key {
            return Err(PoolError::Configuration(format!(
                "min_idle_per_key ({}) must not exceed max_idle_per_key ({})",
                self.min_idle_per_key, self.max_idle_per_key
            )));
        }
        if self.max_idle_per_key > self.max_total_per_key {
            return Err(PoolError::Configuration(format!(
                "max_idle_per_key ({}) must not exceed max_total_per_key ({})",
                self.max_idle_per_key, self.max_total_per_key
            )));
        }
        if self.max_total_per_key > self.max_total {
            return Err(PoolError::Configuration(format!(
                "max_total_per_key ({}) must not exceed max_total ({})",
                self.max_total_per_key, self.max_total
            )));
        }
        Ok(())
    }

    pub fn max_total(mut self, max_total: usize) -> Self {
        self.max_total = max_total;
        self
    }

    pub fn max_total_per_key(mut self, max_total_per_key: usize) -> Self {
        self.max_total_per_key = max_total_per_key;
        self
    }

    pub fn max_idle_per_key(mut self, max_idle_per_key: usize) -> Self {
        self.max_idle_per_key = max_idle_per_key;
        self
    }

    pub fn min_idle_per_key(mut self, min_idle_per_key: usize) -> Self {
        self.min_idle_per_key = min_idle_per_key;
        self
    }

    pub fn block_when_exhausted(mut self, block: bool) -> Self {
        self.block_when_exhausted = block;
        self
    }

    pub fn max_block_wait(mut self, wait: Duration) -> Self {
        self.max_block_wait = wait;
        self
    }

    pub fn test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    pub fn test_on_return(mut self, test: bool) -> Self {
        self.test_on_return = test;
        self
    }

    pub fn test_while_idle(mut self, test: bool) -> Self {
        self.test_while_idle = test;
        self
    }

    pub fn eviction_polling_interval(mut self, interval: Duration) -> Self {
        self.eviction_polling_interval = interval;
        self
    }

    pub fn min_evictable_idle_duration(mut self, duration: Duration) -> Self {
        self.min_evictable_idle_duration = duration;
        self
    }

    pub fn destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }
}

/// Clap value parser reading a duration given in milliseconds
pub fn parse_millis(val: &str) -> Result<Duration, String> {
    val.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser, Debug)]
    struct Cli {
        #[clap(flatten)]
        pool: PoolConfig,
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_valid() {
        let config = PoolConfig::default()
            .max_total(0)
            .max_total_per_key(0)
            .max_idle_per_key(0)
            .min_idle_per_key(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_bounds_are_rejected() {
        let cases = [
            PoolConfig::default().min_idle_per_key(6).max_idle_per_key(5),
            PoolConfig::default().max_idle_per_key(11).max_total_per_key(10),
            PoolConfig::default().max_total_per_key(51).max_idle_per_key(5),
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(PoolError::Configuration(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_cli_defaults_match_default_impl() {
        let cli = Cli::try_parse_from(["pool"]).expect("Could not parse empty args");
        assert_eq!(cli.pool, PoolConfig::default());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "pool",
            "--pool-max-total-per-key",
            "2",
            "--pool-block-when-exhausted",
            "false",
            "--pool-max-block-wait-ms",
            "250",
        ])
        .expect("Could not parse args");
        assert_eq!(cli.pool.max_total_per_key, 2);
        assert!(!cli.pool.block_when_exhausted);
        assert_eq!(cli.pool.max_block_wait, Duration::from_millis(250));
    }

    #[test]
    fn test_partial_config_document_uses_defaults() {
        let config: PoolConfig =
            serde_json::from_str(r#"{"max_total_per_key": 3, "test_on_borrow": true}"#)
                .expect("Could not deserialize pool config");
        assert_eq!(
            config,
            PoolConfig::default().max_total_per_key(3).test_on_borrow(true)
        );
    }
}
