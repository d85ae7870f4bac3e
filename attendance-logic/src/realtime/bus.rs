//! Cross-instance fan-out bus.
//!
//! Bridges the local hub to Redis pub/sub so every horizontally scaled
//! instance observes the same broadcast stream. Channel naming is
//! wire-stable: `ws:event:{entity_id}:{event_id}`.

use crate::{
    metrics,
    realtime::{hub::Hub, messages::Envelope},
};
use futures::StreamExt;
use redis::AsyncCommands;
use std::time::Duration;
use thiserror::Error;
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CHANNEL_PREFIX: &str = "ws:event";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub fn channel_name(entity_id: Uuid, event_id: Uuid) -> String {
    format!("{CHANNEL_PREFIX}:{entity_id}:{event_id}")
}

/// Extracts (tenant, event) from a bus channel name by splitting on the
/// literal separator. Anything but `ws:event:<uuid>:<uuid>` is rejected.
pub fn parse_channel_name(name: &str) -> Option<(Uuid, Uuid)> {
    let mut parts = name.split(':');
    if parts.next()? != "ws" || parts.next()? != "event" {
        return None;
    }
    let entity_id = Uuid::parse_str(parts.next()?).ok()?;
    let event_id = Uuid::parse_str(parts.next()?).ok()?;
    parts.next().is_none().then_some((entity_id, event_id))
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("error serializing frame: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct EventBus {
    connection: redis::aio::ConnectionManager,
    client: redis::Client,
}

impl EventBus {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let connection = redis::aio::ConnectionManager::new(client.clone()).await?;
        Ok(Self { connection, client })
    }

    /// Publishes one frame on the event channel. Every subscribed instance,
    /// this one included, re-injects it into its local hub.
    pub async fn publish(
        &self,
        entity_id: Uuid,
        event_id: Uuid,
        frame: &Envelope,
    ) -> Result<(), BusError> {
        let payload = frame.to_json()?;
        let mut conn = self.connection.clone();
        let _: () = conn
            .publish(channel_name(entity_id, event_id), payload)
            .await?;
        metrics::BUS_MESSAGES_TOTAL.with_label_values(&["out"]).inc();
        Ok(())
    }

    /// Pattern-subscribes to every event channel and feeds decoded frames
    /// into the local hub until cancelled. Connection failures trigger a
    /// delayed resubscribe; duplicates across reconnects are possible and
    /// clients are expected to be idempotent.
    pub fn run_subscriber(&self, hub: Hub, shutdown: CancellationToken) -> JoinHandle<()> {
        let client = self.client.clone();
        tokio::spawn(async move {
            loop {
                match Self::subscribe_all(&client, &hub, &shutdown).await {
                    Ok(()) => break,
                    Err(err) => {
                        tracing::error!(error = ?err, "bus subscriber failed, reconnecting");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
            tracing::debug!("bus subscriber stopped");
        })
    }

    async fn subscribe_all(
        client: &redis::Client,
        hub: &Hub,
        shutdown: &CancellationToken,
    ) -> Result<(), redis::RedisError> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(format!("{CHANNEL_PREFIX}:*")).await?;
        tracing::info!("bus subscriber listening on {CHANNEL_PREFIX}:*");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                maybe_msg = stream.next() => {
                    let msg = maybe_msg.ok_or_else(|| {
                        redis::RedisError::from((redis::ErrorKind::IoError, "pub/sub connection closed"))
                    })?;

                    let channel = msg.get_channel_name();
                    let Some((entity_id, event_id)) = parse_channel_name(channel) else {
                        tracing::warn!(channel, "unparseable bus channel name");
                        continue;
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(err) => {
                            tracing::warn!(channel, error = ?err, "non-text bus payload");
                            continue;
                        }
                    };
                    if Envelope::from_json(&payload).is_err() {
                        tracing::warn!(channel, "malformed bus frame");
                        continue;
                    }

                    metrics::BUS_MESSAGES_TOTAL.with_label_values(&["in"]).inc();
                    hub.broadcast(entity_id, event_id, payload).await;
                }
            }
        }
    }
}
