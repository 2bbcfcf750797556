use crate::conn::{is_ready, ConnectConfig};
use crate::error::AhnlichError;
use ahnlich_pool::ClientFactory;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;
use tonic::transport::Channel;

/// A gRPC client that lives on top of a single tonic [`Channel`]
pub trait ServiceClient: fmt::Debug + Send + Sync + 'static {
    /// Short service name used in log events
    const SERVICE: &'static str;

    fn from_channel(channel: Channel) -> Self;

    fn channel(&self) -> &Channel;
}

/// [`ClientFactory`] opening one channel per client to the address used as pool key
pub struct ServiceClientFactory<C> {
    config: ConnectConfig,
    _client: PhantomData<fn() -> C>,
}

impl<C> ServiceClientFactory<C> {
    pub fn new(config: ConnectConfig) -> Self {
        Self {
            config,
            _client: PhantomData,
        }
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }
}

impl<C> fmt::Debug for ServiceClientFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClientFactory")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait::async_trait]
impl<C: ServiceClient> ClientFactory for ServiceClientFactory<C> {
    type Client = C;
    type Error = AhnlichError;

    async fn create(&self, key: &str) -> Result<C, AhnlichError> {
        let channel = self.config.connect(key).await?;
        tracing::debug!(key, service = C::SERVICE, "Opened channel");
        Ok(C::from_channel(channel))
    }

    async fn destroy(&self, client: C, _deadline: Duration) -> Result<(), AhnlichError> {
        // the connection is torn down once the last clone of the channel goes away
        drop(client);
        Ok(())
    }

    async fn validate(&self, client: &C) -> Result<bool, AhnlichError> {
        Ok(is_ready(client.channel(), self.config.probe_timeout).await)
    }
}
