//! Connection pool against a live in-process target

use std::sync::Arc;
use std::time::Duration;

use kvparity_core::{Endpoint, Error, Operation, OperationSpec};
use kvparity_pool::{Connection, ConnectionPool, PoolConfig};
use kvparity_testing::{MemoryServer, ServerOptions};
use kvparity_wire::Frame;

fn fast_config() -> PoolConfig {
    PoolConfig::default()
        .with_max_connections(2)
        .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
        .with_op_timeout(Duration::from_secs(2))
}

fn set(seq: u64, db: u16, key: &str, value: &str) -> OperationSpec {
    OperationSpec {
        seq,
        db,
        key: key.to_string(),
        op: Operation::Set {
            value: value.to_string(),
        },
    }
}

fn append(seq: u64, key: &str, value: &str) -> OperationSpec {
    OperationSpec {
        seq,
        db: 0,
        key: key.to_string(),
        op: Operation::Append {
            value: value.to_string(),
        },
    }
}

#[tokio::test]
async fn test_handshake_negotiates_resp3() {
    let server = MemoryServer::start().await.unwrap();
    let pool = ConnectionPool::connect(&[server.endpoint()], fast_config())
        .await
        .unwrap();
    let target = &pool.targets()[0];
    assert_eq!(target.protocol(), 3);
    assert_eq!(target.capabilities().server.as_deref(), Some("kvparity-memory"));
    assert_eq!(target.capabilities().flag("mode"), Some("standalone"));
}

#[tokio::test]
async fn test_handshake_falls_back_to_resp2() {
    let server = MemoryServer::start_with(ServerOptions {
        hello: false,
        ..ServerOptions::default()
    })
    .await
    .unwrap();
    let (mut conn, caps) = Connection::open(&server.endpoint(), &fast_config())
        .await
        .unwrap();
    assert_eq!(caps.protocol, 2);
    assert_eq!(conn.protocol(), 2);
    conn.ping().await.unwrap();
}

#[tokio::test]
async fn test_select_is_tracked() {
    let server = MemoryServer::start().await.unwrap();
    let (mut conn, _) = Connection::open(&server.endpoint(), &fast_config())
        .await
        .unwrap();
    conn.execute(&set(0, 2, "k", "v")).await.unwrap();
    assert_eq!(conn.db(), 2);
    assert_eq!(server.dbsize(2), 1);
    assert_eq!(server.dbsize(0), 0);
}

#[tokio::test]
async fn test_error_reply_is_protocol_error() {
    let server = MemoryServer::start().await.unwrap();
    server.command(&["RPUSH", "l", "a"]);
    let pool = ConnectionPool::connect(&[server.endpoint()], fast_config())
        .await
        .unwrap();
    let mut conn = pool.acquire(&pool.targets()[0]).await.unwrap();
    let err = conn.execute(&append(0, "l", "x")).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_acquire_blocks_at_bound() {
    let server = MemoryServer::start().await.unwrap();
    let pool = ConnectionPool::connect(&[server.endpoint()], fast_config())
        .await
        .unwrap();
    let target = pool.targets()[0].clone();

    let first = pool.acquire(&target).await.unwrap();
    let second = pool.acquire(&target).await.unwrap();
    assert_eq!(pool.pools()[0].available(), 0);

    let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire(&target)).await;
    assert!(blocked.is_err());

    pool.release(first);
    let third = tokio::time::timeout(Duration::from_secs(1), pool.acquire(&target))
        .await
        .unwrap()
        .unwrap();
    drop(second);
    drop(third);
    assert_eq!(pool.pools()[0].available(), 2);
    assert_eq!(pool.pools()[0].idle_count(), 2);
}

#[tokio::test]
async fn test_lost_reply_is_retried_on_new_connection() {
    let server = MemoryServer::start().await.unwrap();
    let pool = ConnectionPool::connect(&[server.endpoint()], fast_config())
        .await
        .unwrap();
    let mut conn = pool.acquire(&pool.targets()[0]).await.unwrap();

    server.drop_next_replies(1);
    conn.execute(&set(0, 0, "k", "v")).await.unwrap();
    assert_eq!(server.command(&["GET", "k"]), Frame::bulk("v"));
}

#[tokio::test]
async fn test_retries_exhausted_reports_attempts() {
    let server = MemoryServer::start().await.unwrap();
    let config = fast_config().with_max_retries(2);
    let pool = ConnectionPool::connect(&[server.endpoint()], config)
        .await
        .unwrap();
    let mut conn = pool.acquire(&pool.targets()[0]).await.unwrap();

    server.drop_next_replies(10);
    let err = conn.execute(&set(0, 0, "k", "v")).await.unwrap_err();
    match err {
        Error::Connectivity { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("Wrong error variant: {:?}", other),
    }
    drop(conn);
    assert_eq!(pool.pools()[0].idle_count(), 0);
}

#[tokio::test]
async fn test_unreachable_target_fails_after_retries() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = fast_config().with_max_retries(1);
    let err = ConnectionPool::connect(&[Endpoint::localhost(port)], config)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connectivity { attempts: 2, .. }));
}

#[tokio::test]
async fn test_broadcast_preserves_same_key_order() {
    let a = MemoryServer::start().await.unwrap();
    let b = MemoryServer::start().await.unwrap();
    let pool = ConnectionPool::connect(&[a.endpoint(), b.endpoint()], fast_config())
        .await
        .unwrap();

    let mut batch = Vec::new();
    for i in 0..200u64 {
        let key = format!("kp:{}", i % 7);
        batch.push(append(i, &key, &format!("{},", i)));
    }
    let results = pool.broadcast(&batch).await;
    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(*result.outcome.as_ref().unwrap(), 200);
    }

    for k in 0..7u64 {
        let key = format!("kp:{}", k);
        let expected: String = (0..200u64)
            .filter(|i| i % 7 == k)
            .map(|i| format!("{},", i))
            .collect();
        assert_eq!(a.command(&["GET", key.as_str()]), Frame::bulk(expected.clone()));
        assert_eq!(b.command(&["GET", key.as_str()]), Frame::bulk(expected));
    }
}

#[tokio::test]
async fn test_broadcast_reports_failing_target() {
    let a = MemoryServer::start().await.unwrap();
    let b = MemoryServer::start().await.unwrap();
    b.command(&["RPUSH", "kp:1", "x"]);
    let pool = Arc::new(
        ConnectionPool::connect(&[a.endpoint(), b.endpoint()], fast_config())
            .await
            .unwrap(),
    );

    let results = pool.broadcast(&[append(0, "kp:1", "v")]).await;
    assert!(results[0].outcome.is_ok());
    assert!(matches!(results[1].outcome, Err(Error::Protocol { .. })));
    assert_eq!(results[1].target.endpoint(), &b.endpoint());
}

#[tokio::test]
async fn test_reopen_rejects_protocol_downgrade() {
    let server = MemoryServer::start().await.unwrap();
    let pool = ConnectionPool::connect(&[server.endpoint()], fast_config())
        .await
        .unwrap();
    assert_eq!(pool.targets()[0].protocol(), 3);
    let mut conn = pool.acquire(&pool.targets()[0]).await.unwrap();
    conn.execute(&set(0, 0, "k", "v")).await.unwrap();

    server.set_hello(false);
    server.drop_next_replies(1);
    let err = conn.execute(&set(1, 0, "k", "w")).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }), "{:?}", err);
    assert!(!err.is_retryable());
}
