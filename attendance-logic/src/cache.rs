//! Redis-backed latest-location cache.
//!
//! Keeps the most recent ping per (event, participant) with an
//! event-lifetime TTL, an append-only ingress buffer per tenant, and a
//! pub/sub channel per event carrying every promoted update. Writes to the
//! latest entry are monotonic in the ping timestamp: a late arrival is
//! buffered but never replaces a newer cached position.

use crate::types::Ping;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use redis::AsyncCommands;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

const RECONNECT_RETRY_FACTOR: u64 = 2;
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Buffered updates delivered to a single subscriber.
const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Clone)]
pub struct LocationCache {
    connection: redis::aio::ConnectionManager,
    client: redis::Client,
}

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] Arc<redis::RedisError>),
    #[error("error deserializing cached value {cached_value:?}: {error:?}")]
    Deserialization {
        cached_value: String,
        error: Arc<serde_json::Error>,
    },
    #[error("error serializing cached value: {error:?}")]
    Serialization { error: Arc<serde_json::Error> },
}

pub fn latest_key(event_id: Uuid, participant_id: Uuid) -> String {
    format!("location:latest:{event_id}:{participant_id}")
}

/// Companion key holding the epoch-millis timestamp of the cached latest
/// ping. The promotion script compares against it so a late arrival never
/// replaces a newer entry; it expires together with the JSON key.
fn latest_ts_key(event_id: Uuid, participant_id: Uuid) -> String {
    format!("location:latest_ts:{event_id}:{participant_id}")
}

pub fn buffer_key(entity_id: Uuid) -> String {
    format!("location:buffer:{entity_id}")
}

pub fn updates_channel(event_id: Uuid) -> String {
    format!("location:updates:{event_id}")
}

/// TTL for a latest-location entry: the cache must outlive the event by an
/// hour so dashboards opened right after it ends still render the final
/// state, with a one-hour floor for events already in the past.
pub fn event_ttl(event_end: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let floor = ChronoDuration::hours(1);
    let until_end = (event_end - now).max(ChronoDuration::zero());
    (until_end + floor)
        .max(floor)
        .to_std()
        .unwrap_or(Duration::from_secs(3600))
}

impl LocationCache {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;

        let config = redis::aio::ConnectionManagerConfig::new()
            .set_factor(RECONNECT_RETRY_FACTOR)
            .set_max_delay(RECONNECT_MAX_DELAY.as_millis() as u64);
        let connection =
            redis::aio::ConnectionManager::new_with_config(client.clone(), config).await?;

        Ok(Self { connection, client })
    }

    /// Appends the ping to the tenant ingress buffer, promotes it to the
    /// latest entry unless a newer one is already cached, and publishes
    /// promoted pings on the event updates channel. A failed publish is
    /// logged, never propagated.
    pub async fn push(&self, ping: &Ping, event_end: DateTime<Utc>) -> Result<(), CacheError> {
        let payload = self.serialize(ping)?;
        let ttl = event_ttl(event_end, Utc::now());

        let mut conn = self.connection.clone();
        let _: () = conn
            .rpush(buffer_key(ping.entity_id), &payload)
            .await
            .map_err(Arc::new)?;

        let promoted = self.write_latest(&mut conn, ping, &payload, ttl).await?;
        if !promoted {
            return Ok(());
        }

        if let Err(err) = conn
            .publish::<_, _, ()>(updates_channel(ping.event_id), &payload)
            .await
        {
            tracing::warn!(event_id = %ping.event_id, error = ?err, "failed to publish location update");
        }

        Ok(())
    }

    /// The latest-key write portion of [`push`](Self::push), for callers
    /// that already persisted the ping durably. Subject to the same
    /// monotonicity guard: a stale ping never regresses the entry.
    pub async fn set_latest(&self, ping: &Ping, event_end: DateTime<Utc>) -> Result<(), CacheError> {
        let payload = self.serialize(ping)?;
        let ttl = event_ttl(event_end, Utc::now());

        let mut conn = self.connection.clone();
        self.write_latest(&mut conn, ping, &payload, ttl).await?;
        Ok(())
    }

    /// Conditionally replaces the latest entry. The compare and the write
    /// execute as one server-side script: the companion timestamp key is
    /// read, and only a ping at least as new as the cached one is written.
    /// Returns whether the ping became the latest.
    async fn write_latest(
        &self,
        conn: &mut redis::aio::ConnectionManager,
        ping: &Ping,
        payload: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let script = redis::Script::new(
            r#"
            local cached = tonumber(redis.call('GET', KEYS[2]))
            if cached and cached > tonumber(ARGV[1]) then
                return 0
            end
            redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
            redis.call('SET', KEYS[2], ARGV[1], 'EX', ARGV[3])
            return 1
            "#,
        );

        let promoted: i64 = script
            .key(latest_key(ping.event_id, ping.participant_id))
            .key(latest_ts_key(ping.event_id, ping.participant_id))
            .arg(ping.timestamp.timestamp_millis())
            .arg(payload)
            .arg(ttl.as_secs())
            .invoke_async(conn)
            .await
            .map_err(Arc::new)?;

        if promoted == 0 {
            tracing::debug!(
                participant_id = %ping.participant_id,
                timestamp = %ping.timestamp,
                "stale ping left the cached latest untouched"
            );
        }
        Ok(promoted == 1)
    }

    /// Reads and trims up to `n` buffered pings for the tenant. The read and
    /// the trim execute as one server-side script so concurrent drains never
    /// observe the same entry. Returns `[]` on an empty buffer.
    pub async fn pop_batch(&self, entity_id: Uuid, n: usize) -> Result<Vec<Ping>, CacheError> {
        let script = redis::Script::new(
            r#"
            local items = redis.call('LRANGE', KEYS[1], 0, ARGV[1] - 1)
            if #items > 0 then
                redis.call('LTRIM', KEYS[1], ARGV[1], -1)
            end
            return items
            "#,
        );

        let mut conn = self.connection.clone();
        let raw: Vec<String> = script
            .key(buffer_key(entity_id))
            .arg(n)
            .invoke_async(&mut conn)
            .await
            .map_err(Arc::new)?;

        let pings = raw
            .iter()
            .filter_map(|payload| match serde_json::from_str::<Ping>(payload) {
                Ok(ping) => Some(ping),
                Err(err) => {
                    tracing::warn!(%entity_id, error = ?err, "dropping malformed buffered ping");
                    None
                }
            })
            .collect();
        Ok(pings)
    }

    pub async fn get_latest(
        &self,
        event_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Option<Ping>, CacheError> {
        let mut conn = self.connection.clone();
        let val: Option<String> = conn
            .get(latest_key(event_id, participant_id))
            .await
            .map_err(Arc::new)?;

        val.map(|v| self.try_deserialize(&v)).transpose()
    }

    /// Batched latest lookup; participants without a cached entry are
    /// omitted rather than reported as gaps.
    pub async fn get_latest_many(
        &self,
        event_id: Uuid,
        participant_ids: &[Uuid],
    ) -> Result<Vec<Ping>, CacheError> {
        if participant_ids.is_empty() {
            return Ok(vec![]);
        }

        let keys = participant_ids
            .iter()
            .map(|p| latest_key(event_id, *p))
            .collect::<Vec<_>>();

        let mut conn = self.connection.clone();
        let values: Vec<Option<String>> = conn.mget(keys).await.map_err(Arc::new)?;

        values
            .into_iter()
            .flatten()
            .map(|v| self.try_deserialize(&v))
            .collect()
    }

    /// Subscribes to the update channel of one event. The returned receiver
    /// yields every subsequent `push`/`set_latest` payload until dropped.
    pub async fn subscribe(&self, event_id: Uuid) -> Result<mpsc::Receiver<Ping>, CacheError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(Arc::new)?;
        pubsub
            .subscribe(updates_channel(event_id))
            .await
            .map_err(Arc::new)?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(_) => continue,
                };
                match serde_json::from_str::<Ping>(&payload) {
                    Ok(ping) => {
                        if tx.send(ping).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%event_id, error = ?err, "malformed location update payload")
                    }
                }
            }
        });

        Ok(rx)
    }

    fn serialize(&self, ping: &Ping) -> Result<String, CacheError> {
        serde_json::to_string(ping)
            .map_err(|e| CacheError::Serialization { error: Arc::new(e) })
    }

    fn try_deserialize(&self, value: &str) -> Result<Ping, CacheError> {
        serde_json::from_str(value).map_err(|e| CacheError::Deserialization {
            cached_value: value.to_string(),
            error: Arc::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn key_layout_is_wire_stable() {
        let event = Uuid::new_v4();
        let participant = Uuid::new_v4();
        let entity = Uuid::new_v4();
        assert_eq!(
            latest_key(event, participant),
            format!("location:latest:{event}:{participant}")
        );
        assert_eq!(
            latest_ts_key(event, participant),
            format!("location:latest_ts:{event}:{participant}")
        );
        assert_eq!(buffer_key(entity), format!("location:buffer:{entity}"));
        assert_eq!(
            updates_channel(event),
            format!("location:updates:{event}")
        );
    }

    fn ping_at(event_id: Uuid, participant_id: Uuid, timestamp: DateTime<Utc>) -> Ping {
        Ping {
            id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            event_id,
            participant_id,
            lat: -23.5505,
            lng: -46.6333,
            timestamp,
            created_at: timestamp,
        }
    }

    #[tokio::test]
    #[ignore = "needs a running redis; set ATTENDANCE_TEST_REDIS_URL"]
    async fn a_stale_ping_never_regresses_the_cached_latest() {
        let url = std::env::var("ATTENDANCE_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let cache = LocationCache::new(&url).await.unwrap();

        let event = Uuid::new_v4();
        let participant = Uuid::new_v4();
        let t0: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();
        let event_end = t0 + ChronoDuration::hours(2);

        let newer = ping_at(event, participant, t0 + ChronoDuration::seconds(60));
        let older = ping_at(event, participant, t0);

        cache.push(&newer, event_end).await.unwrap();
        cache.push(&older, event_end).await.unwrap();

        let latest = cache.get_latest(event, participant).await.unwrap().unwrap();
        assert_eq!(latest, newer);

        // a genuinely newer ping still replaces the entry
        let newest = ping_at(event, participant, t0 + ChronoDuration::seconds(120));
        cache.set_latest(&newest, event_end).await.unwrap();
        let latest = cache.get_latest(event, participant).await.unwrap().unwrap();
        assert_eq!(latest, newest);
    }

    #[test]
    fn ttl_outlives_the_event_by_an_hour() {
        let now: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();
        let end = now + ChronoDuration::hours(2);
        assert_eq!(event_ttl(end, now), Duration::from_secs(3 * 3600));
    }

    #[test]
    fn ttl_has_a_one_hour_floor_for_past_events() {
        let now: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();
        let end = now - ChronoDuration::hours(5);
        assert_eq!(event_ttl(end, now), Duration::from_secs(3600));
    }

    #[test]
    fn ttl_for_an_event_ending_now_is_exactly_the_floor() {
        let now: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();
        assert_eq!(event_ttl(now, now), Duration::from_secs(3600));
    }
}
