use chrono::{DateTime, Utc};
use entity::participants::Model;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use entity::sea_orm_active_enums::ParticipantStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub phone_number: String,
    pub status: ParticipantStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Model> for Participant {
    fn from(v: Model) -> Self {
        Self {
            id: v.id,
            entity_id: v.entity_id,
            event_id: v.event_id,
            name: v.name,
            phone_number: v.phone_number,
            status: v.status,
            confirmed_at: v.confirmed_at,
            checked_in_at: v.checked_in_at,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewParticipant {
    pub name: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateParticipant {
    pub name: Option<String>,
    pub phone_number: Option<String>,
}
