use chrono::{DateTime, Utc};
use entity::events::Model;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use entity::sea_orm_active_enums::EventStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: EventStatus,
    pub venue_lat: f64,
    pub venue_lng: f64,
    pub venue_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Model> for Event {
    fn from(v: Model) -> Self {
        Self {
            id: v.id,
            entity_id: v.entity_id,
            name: v.name,
            description: v.description,
            start_time: v.start_time,
            end_time: v.end_time,
            status: v.status,
            venue_lat: v.venue_lat,
            venue_lng: v.venue_lng,
            venue_name: v.venue_name,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub venue_lat: f64,
    pub venue_lng: f64,
    pub venue_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEvent {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub venue_lat: Option<f64>,
    pub venue_lng: Option<f64>,
    pub venue_name: Option<String>,
}

/// Whether `from -> to` is a legal lifecycle transition.
///
/// draft -> scheduled -> active -> completed, with any non-terminal
/// state allowed to move to cancelled.
pub fn can_transition(from: &EventStatus, to: &EventStatus) -> bool {
    use EventStatus::*;
    matches!(
        (from, to),
        (Draft, Scheduled)
            | (Scheduled, Active)
            | (Active, Completed)
            | (Draft, Cancelled)
            | (Scheduled, Cancelled)
            | (Active, Cancelled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_forms_a_dag() {
        use EventStatus::*;
        assert!(can_transition(&Draft, &Scheduled));
        assert!(can_transition(&Scheduled, &Active));
        assert!(can_transition(&Active, &Completed));
        for non_terminal in [Draft, Scheduled, Active] {
            assert!(can_transition(&non_terminal, &Cancelled));
        }

        // no transitions leave a terminal state
        for terminal in [Completed, Cancelled] {
            for to in [Draft, Scheduled, Active, Completed, Cancelled] {
                assert!(!can_transition(&terminal, &to));
            }
        }
        // no skipping forward
        assert!(!can_transition(&Draft, &Active));
        assert!(!can_transition(&Scheduled, &Completed));
    }
}
