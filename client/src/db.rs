use crate::conn::{is_ready, ConnectConfig};
use crate::error::AhnlichError;
use crate::factory::ServiceClient;
use std::time::Duration;
use tonic::transport::Channel;

// GRPC Client for Ahnlich DB
//
// `Channel` makes use of `tower_buffer::Buffer` underneath and hence DbClient is cheap to clone
// and is encouraged for use across multiple threads
// https://docs.rs/tonic/latest/tonic/transport/struct.Channel.html#multiplexing-requests
#[derive(Debug, Clone)]
pub struct DbClient {
    channel: Channel,
}

impl DbClient {
    pub async fn new(addr: String) -> Result<Self, AhnlichError> {
        Self::connect(&addr, &ConnectConfig::default()).await
    }

    pub async fn connect(addr: &str, config: &ConnectConfig) -> Result<Self, AhnlichError> {
        let channel = config.connect(addr).await?;
        Ok(Self { channel })
    }

    /// The channel the db service stubs are built on
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn is_ready(&self, timeout: Duration) -> bool {
        is_ready(&self.channel, timeout).await
    }
}

impl ServiceClient for DbClient {
    const SERVICE: &'static str = "db";

    fn from_channel(channel: Channel) -> Self {
        Self { channel }
    }

    fn channel(&self) -> &Channel {
        &self.channel
    }
}
