//! Tests against a live Redis server.
//!
//! Run with `cargo test -p fanout-store -- --ignored` and `REDIS_URL` pointing
//! at a disposable instance.

use std::time::Duration;

use fanout_store::{RedisStore, SharedStore};

const TIMEOUT: Duration = Duration::from_secs(5);

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string())
}

fn unique(prefix: &str) -> String {
    format!("{prefix}:{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires a running redis server"]
async fn membership_round_trip() {
    let store = RedisStore::connect(&redis_url()).await.unwrap();
    let key = unique("test:connections");

    store.add_member(&key, "1:a").await.unwrap();
    store.add_member(&key, "2:b").await.unwrap();
    store.add_member(&key, "1:a").await.unwrap();
    assert_eq!(store.cardinality(&key).await.unwrap(), 2);

    store.remove_member(&key, "1:a").await.unwrap();
    assert_eq!(store.cardinality(&key).await.unwrap(), 1);

    store.delete_key(&key).await.unwrap();
    assert_eq!(store.cardinality(&key).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a running redis server"]
async fn publish_reaches_subscriber() {
    let store = RedisStore::connect(&redis_url()).await.unwrap();
    let channel = unique("test:broadcast");

    let mut sub = store.subscribe(&channel).await.unwrap();
    let receivers = store.publish(&channel, "hello workers").await.unwrap();
    assert_eq!(receivers, 1);

    let msg = tokio::time::timeout(TIMEOUT, sub.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.as_deref(), Some("hello workers"));

    sub.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running redis server"]
async fn ping_succeeds() {
    let store = RedisStore::connect(&redis_url()).await.unwrap();
    store.ping().await.unwrap();
}
