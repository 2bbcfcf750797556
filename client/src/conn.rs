use crate::error::AhnlichError;
use ahnlich_pool::config::parse_millis;
use clap::{ArgAction, Args};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tonic::client::Grpc;
use tonic::transport::{Channel, Endpoint};

/// How new connections to an ahnlich server are opened and probed
///
/// Flags are prefixed with `--connect-` and durations are taken in milliseconds, so this can be
/// flattened next to [`ahnlich_pool::PoolConfig`] in a binary's clap config.
#[derive(Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Deadline for opening a connection, handshake included
    #[arg(long = "connect-timeout-ms", value_parser = parse_millis, default_value = "5000")]
    pub connect_timeout: Duration,

    /// Deadline applied to every request sent over the connection
    #[arg(long = "connect-request-timeout-ms", value_parser = parse_millis)]
    pub request_timeout: Option<Duration>,

    #[arg(long = "connect-tcp-keepalive-ms", value_parser = parse_millis)]
    pub tcp_keepalive: Option<Duration>,

    /// Interval between HTTP/2 pings on an open connection
    #[arg(long = "connect-http2-keepalive-interval-ms", value_parser = parse_millis)]
    pub http2_keepalive_interval: Option<Duration>,

    /// How long an HTTP/2 ping may go unanswered before the connection is dropped
    #[arg(
        long = "connect-http2-keepalive-timeout-ms",
        value_parser = parse_millis,
        default_value = "20000"
    )]
    pub http2_keepalive_timeout: Duration,

    #[arg(long = "connect-tcp-nodelay", action = ArgAction::Set, default_value_t = true)]
    pub tcp_nodelay: bool,

    /// Longest time a liveness probe may take before the connection counts as broken
    #[arg(long = "connect-probe-timeout-ms", value_parser = parse_millis, default_value = "1000")]
    pub probe_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: None,
            tcp_keepalive: None,
            http2_keepalive_interval: None,
            http2_keepalive_timeout: Duration::from_secs(20),
            tcp_nodelay: true,
            probe_timeout: Duration::from_secs(1),
        }
    }
}

impl ConnectConfig {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn tcp_keepalive(mut self, keepalive: Duration) -> Self {
        self.tcp_keepalive = Some(keepalive);
        self
    }

    pub fn http2_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.http2_keepalive_interval = Some(interval);
        self.http2_keepalive_timeout = timeout;
        self
    }

    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Builds the endpoint for `addr`, which may be a bare `host:port`
    pub fn endpoint(&self, addr: &str) -> Result<Endpoint, AhnlichError> {
        let addr = if !(addr.starts_with("https://") || addr.starts_with("http://")) {
            format!("http://{addr}")
        } else {
            addr.to_string()
        };
        let mut endpoint = Channel::from_shared(addr)?
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(self.tcp_keepalive)
            .tcp_nodelay(self.tcp_nodelay)
            .keep_alive_timeout(self.http2_keepalive_timeout);
        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        if let Some(interval) = self.http2_keepalive_interval {
            endpoint = endpoint.http2_keep_alive_interval(interval);
        }
        Ok(endpoint)
    }

    /// Opens a channel to `addr`, failing once `connect_timeout` has passed
    pub async fn connect(&self, addr: &str) -> Result<Channel, AhnlichError> {
        let endpoint = self.endpoint(addr)?;
        tokio::time::timeout(self.connect_timeout, endpoint.connect())
            .await
            .map_err(|_| AhnlichError::ConnectTimeout(addr.to_string()))?
            .map_err(AhnlichError::from)
    }
}

/// Whether `channel` can take another request within `timeout`
pub async fn is_ready(channel: &Channel, timeout: Duration) -> bool {
    let mut grpc = Grpc::new(channel.clone());
    matches!(tokio::time::timeout(timeout, grpc.ready()).await, Ok(Ok(())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser, Debug)]
    struct Cli {
        #[clap(flatten)]
        connect: ConnectConfig,
    }

    #[test]
    fn test_bare_address_gets_http_scheme() {
        let endpoint = ConnectConfig::default()
            .endpoint("127.0.0.1:1369")
            .expect("Could not build endpoint");
        assert_eq!(endpoint.uri().to_string(), "http://127.0.0.1:1369/");
    }

    #[test]
    fn test_explicit_scheme_is_kept() {
        for addr in ["http://localhost:1370", "https://ahnlich.example.com:443"] {
            let endpoint = ConnectConfig::default()
                .endpoint(addr)
                .expect("Could not build endpoint");
            assert_eq!(endpoint.uri().scheme_str(), addr.split("://").next());
        }
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let result = ConnectConfig::default().endpoint("127.0.0.1:not a port");
        assert!(matches!(result, Err(AhnlichError::InvalidURI(_))));
    }

    #[test]
    fn test_cli_defaults_match_default_impl() {
        let cli = Cli::try_parse_from(["client"]).expect("Could not parse empty args");
        assert_eq!(cli.connect, ConnectConfig::default());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "client",
            "--connect-timeout-ms",
            "250",
            "--connect-request-timeout-ms",
            "1000",
            "--connect-tcp-nodelay",
            "false",
        ])
        .expect("Could not parse args");
        assert_eq!(
            cli.connect,
            ConnectConfig::default()
                .connect_timeout(Duration::from_millis(250))
                .request_timeout(Duration::from_secs(1))
                .tcp_nodelay(false)
        );
    }

    #[test]
    fn test_partial_config_document_uses_defaults() {
        let config: ConnectConfig = serde_json::from_str(r#"{"tcp_nodelay": false}"#)
            .expect("Could not deserialize connect config");
        assert_eq!(config, ConnectConfig::default().tcp_nodelay(false));
    }
}
