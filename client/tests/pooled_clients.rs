use ahnlich_client_rs::conn::ConnectConfig;
use ahnlich_client_rs::db::DbClient;
use ahnlich_client_rs::error::AhnlichError;
use ahnlich_client_rs::pool::{AiClientPool, DbClientPool};
use ahnlich_pool::{PoolConfig, PoolError};
use pretty_assertions::assert_eq;
use std::net::TcpListener;
use std::time::Duration;

/// An address nothing listens on
fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Could not bind listener");
    let addr = listener.local_addr().expect("Could not read local addr");
    drop(listener);
    addr.to_string()
}

fn pool_config() -> PoolConfig {
    PoolConfig::default()
        .block_when_exhausted(false)
        .eviction_polling_interval(Duration::ZERO)
}

fn connect_config() -> ConnectConfig {
    ConnectConfig::default().connect_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn test_refused_connection_is_a_creation_error() {
    let pool = DbClientPool::new(pool_config(), connect_config())
        .await
        .expect("Could not build pool");
    let addr = closed_address();

    let err = pool.borrow(&addr).await.expect_err("nothing listens there");
    let (key, source) = match err {
        PoolError::Creation { key, source } => (key, source),
        other => panic!("expected a creation error, got {other:?}"),
    };
    assert_eq!(key, addr);
    let source = source
        .downcast_ref::<AhnlichError>()
        .expect("source should be a client error");
    assert!(matches!(
        source,
        AhnlichError::Tonic(_) | AhnlichError::ConnectTimeout(_)
    ));

    assert_eq!(pool.stats().creation_failures, 1);
    assert_eq!(pool.active_count(&addr), 0);
}

#[tokio::test]
async fn test_malformed_address_is_a_creation_error() {
    let pool = AiClientPool::new(pool_config(), connect_config())
        .await
        .expect("Could not build pool");

    let err = pool.borrow("127.0.0.1:not a port").await.expect_err("bad uri");
    let source = match err {
        PoolError::Creation { source, .. } => source,
        other => panic!("expected a creation error, got {other:?}"),
    };
    assert!(matches!(
        source.downcast_ref::<AhnlichError>(),
        Some(AhnlichError::InvalidURI(_))
    ));
}

#[tokio::test]
async fn test_invalid_pool_config_is_rejected() {
    let result = DbClientPool::new(
        pool_config().min_idle_per_key(6).max_idle_per_key(5),
        connect_config(),
    )
    .await;
    assert!(matches!(result, Err(PoolError::Configuration(_))));
}

#[tokio::test]
async fn test_single_client_connection_failure() {
    let result = DbClient::connect(&closed_address(), &connect_config()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_typed_pool_closes_like_the_generic_pool() {
    let pool = DbClientPool::new(pool_config(), connect_config())
        .await
        .expect("Could not build pool");
    let handle = pool.clone();
    pool.close().await;

    assert!(handle.is_closed());
    assert!(matches!(
        handle.borrow("127.0.0.1:1369").await,
        Err(PoolError::Closed)
    ));
    assert_eq!(handle.factory().config(), &connect_config());
}
