use crate::conn::{is_ready, ConnectConfig};
use crate::error::AhnlichError;
use crate::factory::ServiceClient;
use std::time::Duration;
use tonic::transport::Channel;

/// GRPC Client for the Ahnlich AI proxy, cheap to clone
#[derive(Debug, Clone)]
pub struct AiClient {
    channel: Channel,
}

impl AiClient {
    pub async fn new(addr: String) -> Result<Self, AhnlichError> {
        Self::connect(&addr, &ConnectConfig::default()).await
    }

    pub async fn connect(addr: &str, config: &ConnectConfig) -> Result<Self, AhnlichError> {
        let channel = config.connect(addr).await?;
        Ok(Self { channel })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn is_ready(&self, timeout: Duration) -> bool {
        is_ready(&self.channel, timeout).await
    }
}

impl ServiceClient for AiClient {
    const SERVICE: &'static str = "ai";

    fn from_channel(channel: Channel) -> Self {
        Self { channel }
    }

    fn channel(&self) -> &Channel {
        &self.channel
    }
}
