use std::time::Duration;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced to callers of the pool
///
/// Validation and destruction failures never show up here, the pool logs them and carries on
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    Configuration(String),
    #[error("Could not create client for key [{key}]: {source}")]
    Creation {
        key: String,
        #[source]
        source: BoxError,
    },
    #[error("Pool exhausted for key [{key}], waited {waited:?}")]
    Exhausted {
        key: String,
        waited: Option<Duration>,
    },
    #[error("Pool is closed")]
    Closed,
    #[error("Client is not an active client of this pool under key [{key}]")]
    ForeignClient { key: String },
}

impl PoolError {
    pub(crate) fn creation(key: &str, source: impl Into<BoxError>) -> Self {
        Self::Creation {
            key: key.to_string(),
            source: source.into(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
