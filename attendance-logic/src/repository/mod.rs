//! Persistence ports the core depends on, and their sea-orm
//! implementations. Every query is tenant-scoped; rows of another tenant
//! are unreachable through this layer. Not-found is an error kind, never an
//! empty success.

pub mod entities;
pub mod events;
pub mod locations;
pub mod participants;
pub mod scheduler_tasks;

pub use entities::DbEntityRepository;
pub use events::DbEventRepository;
pub use locations::DbLocationRepository;
pub use participants::DbParticipantRepository;
pub use scheduler_tasks::DbSchedulerRepository;

use crate::{
    error::ServiceError,
    types::{
        Event, EventStatus, NewEvent, NewParticipant, NewPing, NewTask, NewTenant, Participant,
        ParticipantStatus, Ping, Task, Tenant, UpdateEvent, UpdateParticipant, UpdateTenant,
    },
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait EntityRepository: Send + Sync {
    async fn create(&self, new: NewTenant) -> Result<Tenant, ServiceError>;
    async fn get(&self, id: Uuid) -> Result<Tenant, ServiceError>;
    async fn list(&self) -> Result<Vec<Tenant>, ServiceError>;
    async fn update(&self, id: Uuid, update: UpdateTenant) -> Result<Tenant, ServiceError>;
    async fn delete(&self, id: Uuid) -> Result<(), ServiceError>;
    async fn find_by_phone_number_id(&self, phone_number_id: &str)
        -> Result<Tenant, ServiceError>;
}

#[async_trait::async_trait]
pub trait EventRepository: Send + Sync {
    async fn create(&self, entity_id: Uuid, new: NewEvent) -> Result<Event, ServiceError>;
    async fn get(&self, entity_id: Uuid, id: Uuid) -> Result<Event, ServiceError>;
    async fn list_by_entity(&self, entity_id: Uuid) -> Result<Vec<Event>, ServiceError>;
    async fn update(
        &self,
        entity_id: Uuid,
        id: Uuid,
        update: UpdateEvent,
    ) -> Result<Event, ServiceError>;
    async fn delete(&self, entity_id: Uuid, id: Uuid) -> Result<(), ServiceError>;
    /// Applies a lifecycle transition, rejecting moves outside the DAG with
    /// a conflict.
    async fn transition_status(
        &self,
        entity_id: Uuid,
        id: Uuid,
        to: EventStatus,
    ) -> Result<Event, ServiceError>;
}

#[async_trait::async_trait]
pub trait ParticipantRepository: Send + Sync {
    /// Fails with a conflict when the phone number is already invited to
    /// the event.
    async fn create(
        &self,
        entity_id: Uuid,
        event_id: Uuid,
        new: NewParticipant,
    ) -> Result<Participant, ServiceError>;
    async fn batch_create(
        &self,
        entity_id: Uuid,
        event_id: Uuid,
        new: Vec<NewParticipant>,
    ) -> Result<Vec<Participant>, ServiceError>;
    async fn get(&self, entity_id: Uuid, id: Uuid) -> Result<Participant, ServiceError>;
    async fn list_by_event(
        &self,
        entity_id: Uuid,
        event_id: Uuid,
    ) -> Result<Vec<Participant>, ServiceError>;
    async fn update(
        &self,
        entity_id: Uuid,
        id: Uuid,
        update: UpdateParticipant,
    ) -> Result<Participant, ServiceError>;
    async fn delete(&self, entity_id: Uuid, id: Uuid) -> Result<(), ServiceError>;
    async fn update_status(
        &self,
        entity_id: Uuid,
        id: Uuid,
        status: ParticipantStatus,
    ) -> Result<Participant, ServiceError>;
    /// Every invitation of this phone number within the tenant, newest
    /// event first.
    async fn lookup_by_phone(
        &self,
        entity_id: Uuid,
        phone_number: &str,
    ) -> Result<Vec<Participant>, ServiceError>;
}

#[async_trait::async_trait]
pub trait LocationRepository: Send + Sync {
    async fn create(&self, new: NewPing) -> Result<Ping, ServiceError>;
    async fn batch_create(&self, pings: Vec<Ping>) -> Result<u64, ServiceError>;
    async fn latest_by_participant(
        &self,
        entity_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Ping, ServiceError>;
    /// One row per participant of the event, each the newest by timestamp.
    async fn latest_by_event(
        &self,
        entity_id: Uuid,
        event_id: Uuid,
    ) -> Result<Vec<Ping>, ServiceError>;
    /// Pings of one participant within `[from, to]`, ascending by
    /// timestamp.
    async fn history(
        &self,
        entity_id: Uuid,
        participant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Ping>, ServiceError>;
}

#[async_trait::async_trait]
pub trait SchedulerRepository: Send + Sync {
    async fn create(&self, new: NewTask) -> Result<Task, ServiceError>;
    async fn get(&self, id: Uuid) -> Result<Task, ServiceError>;
    /// Pending tasks due before `before` with retry budget left, ordered by
    /// `scheduled_at` ascending, limited.
    async fn list_pending(
        &self,
        before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Task>, ServiceError>;
    /// Conditional `pending -> processing` claim; the row is the lock.
    /// False means another worker won the race.
    async fn claim(&self, id: Uuid) -> Result<bool, ServiceError>;
    async fn mark_processed(&self, id: Uuid) -> Result<(), ServiceError>;
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), ServiceError>;
    /// Records the failure, returns the task to `pending` and yields the
    /// incremented retry counter.
    async fn increment_retries(&self, id: Uuid, error: &str) -> Result<i32, ServiceError>;
}
