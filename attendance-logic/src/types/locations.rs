use chrono::{DateTime, Utc};
use entity::locations::Model;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single location observation for a participant within an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub event_id: Uuid,
    pub participant_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<Model> for Ping {
    fn from(v: Model) -> Self {
        Self {
            id: v.id,
            entity_id: v.entity_id,
            event_id: v.event_id,
            participant_id: v.participant_id,
            lat: v.lat,
            lng: v.lng,
            timestamp: v.timestamp,
            created_at: v.created_at,
        }
    }
}

impl From<Ping> for Model {
    fn from(v: Ping) -> Self {
        Self {
            id: v.id,
            entity_id: v.entity_id,
            event_id: v.event_id,
            participant_id: v.participant_id,
            lat: v.lat,
            lng: v.lng,
            timestamp: v.timestamp,
            created_at: v.created_at,
        }
    }
}

/// An inbound, not yet persisted location observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPing {
    pub entity_id: Uuid,
    pub event_id: Uuid,
    pub participant_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
}

impl NewPing {
    pub fn into_ping(self, now: DateTime<Utc>) -> Ping {
        Ping {
            id: Uuid::new_v4(),
            entity_id: self.entity_id,
            event_id: self.event_id,
            participant_id: self.participant_id,
            lat: self.lat,
            lng: self.lng,
            timestamp: self.timestamp,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ping_json_round_trip_is_identity() {
        let ping = Ping {
            id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            participant_id: Uuid::new_v4(),
            lat: -23.5505,
            lng: -46.6333,
            timestamp: "2024-05-10T12:00:00Z".parse().unwrap(),
            created_at: "2024-05-10T12:00:01Z".parse().unwrap(),
        };
        let json = serde_json::to_string(&ping).unwrap();
        let decoded: Ping = serde_json::from_str(&json).unwrap();
        assert_eq!(ping, decoded);
    }
}
