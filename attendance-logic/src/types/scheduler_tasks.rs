use chrono::{DateTime, Utc};
use entity::scheduler_tasks::Model;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use entity::sea_orm_active_enums::TaskStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub scheduled_at: DateTime<Utc>,
    pub retries: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<Model> for Task {
    fn from(v: Model) -> Self {
        Self {
            id: v.id,
            entity_id: v.entity_id,
            task_type: v.task_type,
            payload: v.payload,
            status: v.status,
            scheduled_at: v.scheduled_at,
            retries: v.retries,
            max_retries: v.max_retries,
            last_error: v.last_error,
            processed_at: v.processed_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub entity_id: Uuid,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
    pub max_retries: i32,
}
