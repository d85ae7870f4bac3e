use chrono::{DateTime, Utc};
use entity::entities::Model;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The organizational boundary. Every row and cache key is scoped to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub whatsapp_phone_number_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Model> for Tenant {
    fn from(v: Model) -> Self {
        Self {
            id: v.id,
            name: v.name,
            whatsapp_phone_number_id: v.whatsapp_phone_number_id,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub whatsapp_phone_number_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTenant {
    pub name: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
}
