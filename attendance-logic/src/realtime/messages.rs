//! The wire envelope exchanged with realtime dashboard clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    LocationUpdate,
    EtaUpdate,
    ParticipantJoin,
    ParticipantLeave,
    EventUpdate,
    Ping,
    Pong,
}

/// `{"type": ..., "timestamp": ISO-8601, "data": ...}`.
///
/// `data` stays an opaque [`serde_json::Value`] at the transport boundary
/// and is decoded only where the schema is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: MessageType, data: &impl Serialize) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong, &())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdatePayload {
    pub participant_id: Uuid,
    pub participant_name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantPayload {
    pub participant_id: Uuid,
    pub participant_name: String,
    pub status: crate::types::ParticipantStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn envelope_round_trip_is_identity() {
        let envelope = Envelope {
            kind: MessageType::LocationUpdate,
            timestamp: "2024-05-10T12:00:00Z".parse().unwrap(),
            data: json!({"participant_id": "0b8e9e6e-7f3f-4a0f-9f5c-2d5a2c1b7e11", "lat": 1.0}),
        };
        let raw = envelope.to_json().unwrap();
        assert_eq!(Envelope::from_json(&raw).unwrap(), envelope);
    }

    #[test]
    fn type_tags_are_snake_case_on_the_wire() {
        let raw = Envelope::new(MessageType::EtaUpdate, &()).to_json().unwrap();
        assert!(raw.contains(r#""type":"eta_update""#), "raw: {raw}");
    }

    #[test]
    fn location_update_omits_absent_eta_fields() {
        let payload = LocationUpdatePayload {
            participant_id: Uuid::new_v4(),
            participant_name: "Ana".into(),
            lat: -23.5,
            lng: -46.6,
            eta_minutes: None,
            distance_meters: None,
        };
        let raw = serde_json::to_string(&payload).unwrap();
        assert!(!raw.contains("eta_minutes"));
        assert!(!raw.contains("distance_meters"));
    }

    #[test]
    fn parses_a_client_ping() {
        let envelope = Envelope::from_json(
            r#"{"type":"ping","timestamp":"2024-05-10T12:00:00Z","data":{}}"#,
        )
        .unwrap();
        assert_eq!(envelope.kind, MessageType::Ping);
    }
}
