//! Location ingress: validates and authorizes a ping, persists it, keeps
//! the cache current, computes an ETA and fans the update out on the bus.
//!
//! The durable write is the source of truth: once it succeeded, cache, ETA
//! and bus failures degrade the update instead of failing the request. The
//! next accepted ping or the periodic buffer drain catches the gap up.

use crate::{
    cache::LocationCache,
    error::ServiceError,
    eta::{EtaEngine, EtaResult},
    metrics,
    realtime::{
        bus::EventBus,
        messages::{Envelope, LocationUpdatePayload, MessageType},
    },
    repository::{
        EntityRepository, EventRepository, LocationRepository, ParticipantRepository,
    },
    types::{Event, NewPing, Participant, Ping},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;

/// Tolerated clock skew for ping timestamps.
const MAX_FUTURE_SKEW: ChronoDuration = ChronoDuration::minutes(5);

/// Rejects out-of-range coordinates and future-skewed timestamps.
pub fn validate_ping(new: &NewPing, now: DateTime<Utc>) -> Result<(), ServiceError> {
    if !(-90.0..=90.0).contains(&new.lat) {
        return Err(ServiceError::Validation(format!(
            "latitude {} out of range [-90, 90]",
            new.lat
        )));
    }
    if !(-180.0..=180.0).contains(&new.lng) {
        return Err(ServiceError::Validation(format!(
            "longitude {} out of range [-180, 180]",
            new.lng
        )));
    }
    if new.timestamp > now + MAX_FUTURE_SKEW {
        return Err(ServiceError::Validation(
            "timestamp is too far in the future".into(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct LocationIngress {
    entities: Arc<dyn EntityRepository>,
    events: Arc<dyn EventRepository>,
    participants: Arc<dyn ParticipantRepository>,
    locations: Arc<dyn LocationRepository>,
    cache: LocationCache,
    bus: EventBus,
    eta: EtaEngine,
}

impl LocationIngress {
    pub fn new(
        entities: Arc<dyn EntityRepository>,
        events: Arc<dyn EventRepository>,
        participants: Arc<dyn ParticipantRepository>,
        locations: Arc<dyn LocationRepository>,
        cache: LocationCache,
        bus: EventBus,
        eta: EtaEngine,
    ) -> Self {
        Self {
            entities,
            events,
            participants,
            locations,
            cache,
            bus,
            eta,
        }
    }

    /// The API ingress path: persist first, then mirror into the cache and
    /// fan out. Returns the persisted ping.
    pub async fn record_ping(&self, new: NewPing) -> Result<Ping, ServiceError> {
        validate_ping(&new, Utc::now())?;
        let (event, participant) = self.authorize(&new).await?;

        let ping = self.locations.create(new).await?;
        metrics::LOCATION_PINGS_TOTAL.with_label_values(&["api"]).inc();

        if let Err(err) = self.cache.push(&ping, event.end_time).await {
            tracing::warn!(participant_id = %ping.participant_id, error = ?err, "cache update failed after durable write");
        }

        self.fan_out(&event, &participant, &ping).await;
        Ok(ping)
    }

    /// The webhook ingress path: the ping lands in the cache (latest key +
    /// tenant buffer) and on the bus immediately; the durable write happens
    /// on the next buffer drain.
    pub async fn buffer_ping(&self, new: NewPing) -> Result<Ping, ServiceError> {
        validate_ping(&new, Utc::now())?;
        let (event, participant) = self.authorize(&new).await?;

        let ping = new.into_ping(Utc::now());
        self.cache.push(&ping, event.end_time).await?;
        metrics::LOCATION_PINGS_TOTAL
            .with_label_values(&["webhook"])
            .inc();

        self.fan_out(&event, &participant, &ping).await;
        Ok(ping)
    }

    /// Drains every tenant's ingress buffer into postgres. Returns the
    /// number of persisted pings; per-tenant failures are logged and do not
    /// stop the sweep.
    pub async fn flush_buffers(&self, batch_size: usize) -> Result<u64, ServiceError> {
        let tenants = self.entities.list().await?;

        let mut persisted = 0;
        for tenant in tenants {
            loop {
                let batch = match self.cache.pop_batch(tenant.id, batch_size).await {
                    Ok(batch) => batch,
                    Err(err) => {
                        tracing::warn!(entity_id = %tenant.id, error = ?err, "buffer drain failed");
                        break;
                    }
                };
                if batch.is_empty() {
                    break;
                }
                let len = batch.len();
                match self.locations.batch_create(batch).await {
                    Ok(count) => persisted += count,
                    Err(err) => {
                        tracing::error!(entity_id = %tenant.id, error = ?err, "failed to persist drained pings");
                        break;
                    }
                }
                if len < batch_size {
                    break;
                }
            }
        }
        Ok(persisted)
    }

    /// Participant must belong to the event, the event to the tenant.
    async fn authorize(&self, new: &NewPing) -> Result<(Event, Participant), ServiceError> {
        let event = self.events.get(new.entity_id, new.event_id).await?;
        let participant = self
            .participants
            .get(new.entity_id, new.participant_id)
            .await?;
        if participant.event_id != event.id {
            return Err(ServiceError::Forbidden(format!(
                "participant {} does not belong to event {}",
                participant.id, event.id
            )));
        }
        Ok((event, participant))
    }

    /// Publishes a `location_update` for the ping. ETA enrichment and the
    /// bus publish are both soft.
    async fn fan_out(&self, event: &Event, participant: &Participant, ping: &Ping) {
        let eta = match self
            .eta
            .compute(ping.entity_id, ping.participant_id, event.venue_lat, event.venue_lng)
            .await
        {
            Ok(eta) => Some(eta),
            Err(err) => {
                tracing::warn!(participant_id = %ping.participant_id, error = ?err, "eta unavailable for location update");
                None
            }
        };

        let frame = location_update_frame(participant, ping, eta.as_ref());
        if let Err(err) = self.bus.publish(ping.entity_id, ping.event_id, &frame).await {
            tracing::warn!(event_id = %ping.event_id, error = ?err, "failed to publish location update on the bus");
        }
    }
}

pub fn location_update_frame(
    participant: &Participant,
    ping: &Ping,
    eta: Option<&EtaResult>,
) -> Envelope {
    Envelope::new(
        MessageType::LocationUpdate,
        &LocationUpdatePayload {
            participant_id: participant.id,
            participant_name: participant.name.clone(),
            lat: ping.lat,
            lng: ping.lng,
            eta_minutes: eta.map(|e| e.eta_minutes),
            distance_meters: eta.map(|e| e.distance_meters),
        },
    )
}

/// Frame mirroring an attendance change (confirm, decline, check-in) to
/// dashboards.
pub fn participant_status_frame(participant: &Participant, kind: MessageType) -> Envelope {
    Envelope::new(
        kind,
        &crate::realtime::messages::ParticipantPayload {
            participant_id: participant.id,
            participant_name: participant.name.clone(),
            status: participant.status.clone(),
        },
    )
}
