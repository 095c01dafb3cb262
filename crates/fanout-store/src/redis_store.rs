//! Redis-backed shared store.
//!
//! Commands go through one multiplexed connection (cloned per call, as the
//! client intends). Each subscription opens its own pub/sub connection,
//! since a connection in subscribe mode cannot issue regular commands.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::errors::{Result, StoreError};
use crate::traits::{SharedStore, Subscription};

/// Shared store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Open a client for `url` and establish the command connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url = %redacted(url), "connected to redis");
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn add_member(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn cardinality(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.scard(key).await?;
        Ok(count)
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        debug!(channel, "subscribed");
        Ok(Box::new(RedisSubscription {
            pubsub,
            channel: channel.to_owned(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected PING reply: {pong}")))
        }
    }
}

/// A dedicated Redis pub/sub connection subscribed to one channel.
pub struct RedisSubscription {
    pubsub: PubSub,
    channel: String,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self) -> Result<Option<String>> {
        let mut stream = self.pubsub.on_message();
        match stream.next().await {
            Some(msg) => Ok(Some(msg.get_payload::<String>()?)),
            None => Ok(None),
        }
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.pubsub.unsubscribe(&self.channel).await?;
        debug!(channel = %self.channel, "unsubscribed");
        Ok(())
    }
}

/// Strip credentials from a connection URL before logging it.
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_owned(),
    }
}
