use std::time::Duration;

/// Builds, checks and tears down the clients held by a [`crate::KeyedClientPool`]
///
/// A factory closes over whatever connection configuration it needs. The pool hands it the key
/// a client is being built for and otherwise never looks inside the client.
#[async_trait::async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens one independent client for `key`. Must not reach back into the pool.
    async fn create(&self, key: &str) -> Result<Self::Client, Self::Error>;

    /// Releases everything held by `client` within `deadline`.
    ///
    /// Errors are logged by the pool and otherwise ignored. The pool also stops waiting once
    /// the deadline passes.
    async fn destroy(&self, client: Self::Client, deadline: Duration) -> Result<(), Self::Error> {
        let _ = deadline;
        drop(client);
        Ok(())
    }

    /// Cheap liveness probe, `Ok(false)` means the client should be discarded.
    ///
    /// An `Err` (or a panic) inside the probe counts as valid.
    async fn validate(&self, client: &Self::Client) -> Result<bool, Self::Error> {
        let _ = client;
        Ok(true)
    }
}
