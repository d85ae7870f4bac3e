//! Per-participant ETA to the event venue.
//!
//! Prefers a routing backend when one is configured and reachable, falls
//! back to a velocity estimate over the trailing 15-minute ping window, and
//! finally to a fixed-speed assumption.

use crate::{
    error::ServiceError,
    geo,
    repository::LocationRepository,
    settings::EtaSettings,
    types::{Participant, Ping},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Default history window considered for the velocity estimate.
const DEFAULT_VELOCITY_WINDOW: ChronoDuration = ChronoDuration::minutes(15);

/// 30 km/h, the default simple-mode assumption.
const DEFAULT_FALLBACK_SPEED_MPS: f64 = 30.0 * 1000.0 / 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtaMethod {
    Route,
    Velocity,
    Simple,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtaResult {
    pub participant_id: Uuid,
    pub distance_meters: f64,
    pub eta_minutes: i64,
    pub method: EtaMethod,
    /// Timestamp of the ping the estimate is based on.
    pub location_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct RouteEstimate {
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("routing backend unavailable: {0}")]
    Unavailable(String),
    #[error("no route found")]
    NoRoute,
}

/// External map-routing collaborator.
#[async_trait::async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn route(
        &self,
        from: (f64, f64),
        to: (f64, f64),
    ) -> Result<RouteEstimate, RoutingError>;
}

#[derive(Clone)]
pub struct EtaEngine {
    locations: Arc<dyn LocationRepository>,
    routing: Option<Arc<dyn RoutingProvider>>,
    velocity_window: ChronoDuration,
    fallback_speed_mps: f64,
}

impl EtaEngine {
    pub fn new(
        locations: Arc<dyn LocationRepository>,
        routing: Option<Arc<dyn RoutingProvider>>,
    ) -> Self {
        Self {
            locations,
            routing,
            velocity_window: DEFAULT_VELOCITY_WINDOW,
            fallback_speed_mps: DEFAULT_FALLBACK_SPEED_MPS,
        }
    }

    /// Degenerate settings (non-positive speed, zero window) fall back to
    /// the defaults.
    pub fn from_settings(
        locations: Arc<dyn LocationRepository>,
        routing: Option<Arc<dyn RoutingProvider>>,
        settings: &EtaSettings,
    ) -> Self {
        let mut engine = Self::new(locations, routing);
        if settings.fallback_speed_kmh > 0.0 {
            engine.fallback_speed_mps = settings.fallback_speed_kmh * 1000.0 / 3600.0;
        }
        if !settings.velocity_window.is_zero() {
            engine.velocity_window = ChronoDuration::from_std(settings.velocity_window)
                .unwrap_or(DEFAULT_VELOCITY_WINDOW);
        }
        engine
    }

    pub async fn compute(
        &self,
        entity_id: Uuid,
        participant_id: Uuid,
        target_lat: f64,
        target_lng: f64,
    ) -> Result<EtaResult, ServiceError> {
        let latest = self
            .locations
            .latest_by_participant(entity_id, participant_id)
            .await?;

        let distance =
            geo::haversine_distance(latest.lat, latest.lng, target_lat, target_lng);

        if let Some(routing) = &self.routing {
            match routing
                .route((latest.lat, latest.lng), (target_lat, target_lng))
                .await
            {
                Ok(estimate) => {
                    let eta_minutes = if estimate.distance_meters > 0.0 {
                        ((estimate.duration_seconds / 60.0).ceil() as i64).max(1)
                    } else {
                        0
                    };
                    return Ok(EtaResult {
                        participant_id,
                        distance_meters: estimate.distance_meters,
                        eta_minutes,
                        method: EtaMethod::Route,
                        location_timestamp: latest.timestamp,
                    });
                }
                Err(err) => {
                    tracing::warn!(%participant_id, error = ?err, "routing backend failed, falling back");
                }
            }
        }

        if let Some(velocity) = self.estimate_velocity(entity_id, &latest).await {
            return Ok(EtaResult {
                participant_id,
                distance_meters: distance,
                eta_minutes: geo::eta_minutes(distance, velocity),
                method: EtaMethod::Velocity,
                location_timestamp: latest.timestamp,
            });
        }

        Ok(EtaResult {
            participant_id,
            distance_meters: distance,
            eta_minutes: geo::eta_minutes(distance, self.fallback_speed_mps),
            method: EtaMethod::Simple,
            location_timestamp: latest.timestamp,
        })
    }

    /// One result per participant that had a location; individual failures
    /// never fail the batch.
    pub async fn compute_many(
        &self,
        entity_id: Uuid,
        participants: &[Participant],
        target_lat: f64,
        target_lng: f64,
    ) -> Vec<EtaResult> {
        let computations = participants
            .iter()
            .map(|p| self.compute(entity_id, p.id, target_lat, target_lng));

        futures::future::join_all(computations)
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(eta) => Some(eta),
                Err(ServiceError::NotFound(_)) => None,
                Err(err) => {
                    tracing::warn!(error = ?err, "dropping participant from eta batch");
                    None
                }
            })
            .collect()
    }

    /// Average speed over the trailing window, from summed segment
    /// distances and durations. Segments with non-positive duration are
    /// ignored. None unless at least two pings fall into the window and the
    /// participant actually moved.
    async fn estimate_velocity(&self, entity_id: Uuid, latest: &Ping) -> Option<f64> {
        let history = match self
            .locations
            .history(
                entity_id,
                latest.participant_id,
                latest.timestamp - self.velocity_window,
                latest.timestamp,
            )
            .await
        {
            Ok(history) => history,
            Err(err) => {
                tracing::warn!(participant_id = %latest.participant_id, error = ?err, "history unavailable for velocity estimate");
                return None;
            }
        };

        if history.len() < 2 {
            return None;
        }

        let mut total_distance = 0.0;
        let mut total_seconds = 0.0;
        for pair in history.windows(2) {
            let seconds = (pair[1].timestamp - pair[0].timestamp).num_seconds() as f64;
            if seconds <= 0.0 {
                continue;
            }
            total_distance +=
                geo::haversine_distance(pair[0].lat, pair[0].lng, pair[1].lat, pair[1].lng);
            total_seconds += seconds;
        }

        if total_seconds <= 0.0 || total_distance <= 0.0 {
            return None;
        }
        Some(total_distance / total_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        repository::LocationRepository,
        types::{NewPing, Ping},
    };
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;

    struct StaticLocations {
        pings: Vec<Ping>,
    }

    #[async_trait::async_trait]
    impl LocationRepository for StaticLocations {
        async fn create(&self, new: NewPing) -> Result<Ping, ServiceError> {
            Ok(new.into_ping(Utc::now()))
        }

        async fn batch_create(&self, pings: Vec<Ping>) -> Result<u64, ServiceError> {
            Ok(pings.len() as u64)
        }

        async fn latest_by_participant(
            &self,
            _entity_id: Uuid,
            participant_id: Uuid,
        ) -> Result<Ping, ServiceError> {
            self.pings
                .iter()
                .filter(|p| p.participant_id == participant_id)
                .max_by_key(|p| p.timestamp)
                .cloned()
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("no location for participant {participant_id}"))
                })
        }

        async fn latest_by_event(
            &self,
            _entity_id: Uuid,
            _event_id: Uuid,
        ) -> Result<Vec<Ping>, ServiceError> {
            Ok(self.pings.clone())
        }

        async fn history(
            &self,
            _entity_id: Uuid,
            participant_id: Uuid,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Ping>, ServiceError> {
            let mut pings = self
                .pings
                .iter()
                .filter(|p| {
                    p.participant_id == participant_id && p.timestamp >= from && p.timestamp <= to
                })
                .cloned()
                .collect::<Vec<_>>();
            pings.sort_by_key(|p| p.timestamp);
            Ok(pings)
        }
    }

    fn ping(participant_id: Uuid, lat: f64, lng: f64, timestamp: DateTime<Utc>) -> Ping {
        Ping {
            id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            participant_id,
            lat,
            lng,
            timestamp,
            created_at: timestamp,
        }
    }

    fn engine(pings: Vec<Ping>) -> EtaEngine {
        EtaEngine::new(Arc::new(StaticLocations { pings }), None)
    }

    #[tokio::test]
    async fn no_location_is_a_not_found_error() {
        let result = engine(vec![])
            .compute(Uuid::new_v4(), Uuid::new_v4(), 0.0, 0.0)
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn single_ping_falls_back_to_simple_mode() {
        let participant = Uuid::new_v4();
        let t0: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();
        let engine = engine(vec![ping(participant, -23.510, -46.633, t0)]);

        // ~1 km north of the ping, just over two minutes at 30 km/h
        let eta = engine
            .compute(Uuid::new_v4(), participant, -23.501, -46.633)
            .await
            .unwrap();
        assert_eq!(eta.method, EtaMethod::Simple);
        assert_eq!(eta.eta_minutes, 3);
        assert!((eta.distance_meters - 1000.0).abs() < 10.0);
        assert_eq!(eta.location_timestamp, t0);
    }

    #[tokio::test]
    async fn two_recent_pings_use_velocity_mode() {
        let participant = Uuid::new_v4();
        let t0: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();
        let t1 = t0 + ChronoDuration::seconds(60);
        let engine = engine(vec![
            ping(participant, -23.510, -46.633, t0),
            ping(participant, -23.501, -46.633, t1),
        ]);

        // target at the latest position: arrived
        let eta = engine
            .compute(Uuid::new_v4(), participant, -23.501, -46.633)
            .await
            .unwrap();
        assert_eq!(eta.method, EtaMethod::Velocity);
        assert_eq!(eta.eta_minutes, 0);
        assert!(eta.distance_meters < 1.0);

        // target ~1 km farther north at ~16.7 m/s: one minute out
        let eta = engine
            .compute(Uuid::new_v4(), participant, -23.4921, -46.633)
            .await
            .unwrap();
        assert_eq!(eta.method, EtaMethod::Velocity);
        assert_eq!(eta.eta_minutes, 1);
    }

    #[tokio::test]
    async fn pings_outside_the_window_do_not_enable_velocity_mode() {
        let participant = Uuid::new_v4();
        let t0: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();
        let engine = engine(vec![
            ping(participant, -23.510, -46.633, t0 - ChronoDuration::minutes(20)),
            ping(participant, -23.501, -46.633, t0),
        ]);

        let eta = engine
            .compute(Uuid::new_v4(), participant, -23.4921, -46.633)
            .await
            .unwrap();
        assert_eq!(eta.method, EtaMethod::Simple);
    }

    #[tokio::test]
    async fn stationary_history_falls_back_to_simple_mode() {
        let participant = Uuid::new_v4();
        let t0: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();
        let engine = engine(vec![
            ping(participant, -23.501, -46.633, t0),
            ping(participant, -23.501, -46.633, t0 + ChronoDuration::seconds(60)),
        ]);

        let eta = engine
            .compute(Uuid::new_v4(), participant, -23.4921, -46.633)
            .await
            .unwrap();
        assert_eq!(eta.method, EtaMethod::Simple);
    }

    #[tokio::test]
    async fn routing_backend_wins_and_failures_fall_back() {
        struct FixedRoute;
        #[async_trait::async_trait]
        impl RoutingProvider for FixedRoute {
            async fn route(
                &self,
                _from: (f64, f64),
                _to: (f64, f64),
            ) -> Result<RouteEstimate, RoutingError> {
                Ok(RouteEstimate {
                    distance_meters: 1500.0,
                    duration_seconds: 420.0,
                })
            }
        }
        struct DownRoute;
        #[async_trait::async_trait]
        impl RoutingProvider for DownRoute {
            async fn route(
                &self,
                _from: (f64, f64),
                _to: (f64, f64),
            ) -> Result<RouteEstimate, RoutingError> {
                Err(RoutingError::Unavailable("connection refused".into()))
            }
        }

        let participant = Uuid::new_v4();
        let t0: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();
        let pings = vec![ping(participant, -23.510, -46.633, t0)];

        let routed = EtaEngine::new(
            Arc::new(StaticLocations {
                pings: pings.clone(),
            }),
            Some(Arc::new(FixedRoute)),
        );
        let eta = routed
            .compute(Uuid::new_v4(), participant, -23.501, -46.633)
            .await
            .unwrap();
        assert_eq!(eta.method, EtaMethod::Route);
        assert_eq!(eta.eta_minutes, 7);
        assert_eq!(eta.distance_meters, 1500.0);

        let degraded = EtaEngine::new(
            Arc::new(StaticLocations { pings }),
            Some(Arc::new(DownRoute)),
        );
        let eta = degraded
            .compute(Uuid::new_v4(), participant, -23.501, -46.633)
            .await
            .unwrap();
        assert_eq!(eta.method, EtaMethod::Simple);
    }

    #[tokio::test]
    async fn settings_override_the_fallback_speed_and_window() {
        let participant = Uuid::new_v4();
        let t0: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();

        // ~1 km at 120 km/h fits in a single minute
        let fast = EtaEngine::from_settings(
            Arc::new(StaticLocations {
                pings: vec![ping(participant, -23.510, -46.633, t0)],
            }),
            None,
            &EtaSettings {
                fallback_speed_kmh: 120.0,
                velocity_window: std::time::Duration::from_secs(15 * 60),
            },
        );
        let eta = fast
            .compute(Uuid::new_v4(), participant, -23.501, -46.633)
            .await
            .unwrap();
        assert_eq!(eta.method, EtaMethod::Simple);
        assert_eq!(eta.eta_minutes, 1);

        // a shrunken window excludes the older ping, disabling velocity mode
        let narrow = EtaEngine::from_settings(
            Arc::new(StaticLocations {
                pings: vec![
                    ping(participant, -23.510, -46.633, t0 - ChronoDuration::seconds(90)),
                    ping(participant, -23.501, -46.633, t0),
                ],
            }),
            None,
            &EtaSettings {
                fallback_speed_kmh: 30.0,
                velocity_window: std::time::Duration::from_secs(60),
            },
        );
        let eta = narrow
            .compute(Uuid::new_v4(), participant, -23.4921, -46.633)
            .await
            .unwrap();
        assert_eq!(eta.method, EtaMethod::Simple);
    }

    #[tokio::test]
    async fn batch_compute_drops_participants_without_locations() {
        let with_location = Uuid::new_v4();
        let without_location = Uuid::new_v4();
        let t0: DateTime<Utc> = "2024-05-10T12:00:00Z".parse().unwrap();
        let engine = engine(vec![ping(with_location, -23.510, -46.633, t0)]);

        let as_participant = |id: Uuid| Participant {
            id,
            entity_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            name: "p".into(),
            phone_number: "+5511999990000".into(),
            status: crate::types::ParticipantStatus::Confirmed,
            confirmed_at: None,
            checked_in_at: None,
            created_at: t0,
            updated_at: t0,
        };

        let results = engine
            .compute_many(
                Uuid::new_v4(),
                &[as_participant(with_location), as_participant(without_location)],
                -23.501,
                -46.633,
            )
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].participant_id, with_location);
    }
}
