use crate::{
    error::ServiceError,
    repository::EventRepository,
    types::{events::can_transition, Event, EventStatus, NewEvent, UpdateEvent},
};
use chrono::Utc;
use entity::events::{ActiveModel, Column, Entity, Model};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder,
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct DbEventRepository {
    db: Arc<DatabaseConnection>,
}

impl DbEventRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_scoped(&self, entity_id: Uuid, id: Uuid) -> Result<Model, ServiceError> {
        Entity::find_by_id(id)
            .filter(Column::EntityId.eq(entity_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("event {id}")))
    }
}

#[async_trait::async_trait]
impl EventRepository for DbEventRepository {
    async fn create(&self, entity_id: Uuid, new: NewEvent) -> Result<Event, ServiceError> {
        if new.start_time > new.end_time {
            return Err(ServiceError::Validation(
                "start_time must not be after end_time".into(),
            ));
        }

        let now = Utc::now();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            entity_id: Set(entity_id),
            name: Set(new.name),
            description: Set(new.description),
            start_time: Set(new.start_time),
            end_time: Set(new.end_time),
            status: Set(EventStatus::Draft),
            venue_lat: Set(new.venue_lat),
            venue_lng: Set(new.venue_lng),
            venue_name: Set(new.venue_name),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let inserted = Entity::insert(model)
            .exec_with_returning(self.db.as_ref())
            .await?;
        Ok(inserted.into())
    }

    async fn get(&self, entity_id: Uuid, id: Uuid) -> Result<Event, ServiceError> {
        self.find_scoped(entity_id, id).await.map(Event::from)
    }

    async fn list_by_entity(&self, entity_id: Uuid) -> Result<Vec<Event>, ServiceError> {
        let models = Entity::find()
            .filter(Column::EntityId.eq(entity_id))
            .order_by_asc(Column::StartTime)
            .all(self.db.as_ref())
            .await?;
        Ok(models.into_iter().map(Event::from).collect())
    }

    async fn update(
        &self,
        entity_id: Uuid,
        id: Uuid,
        update: UpdateEvent,
    ) -> Result<Event, ServiceError> {
        let current = self.find_scoped(entity_id, id).await?;

        let start_time = update.start_time.unwrap_or(current.start_time);
        let end_time = update.end_time.unwrap_or(current.end_time);
        if start_time > end_time {
            return Err(ServiceError::Validation(
                "start_time must not be after end_time".into(),
            ));
        }

        let mut active = current.into_active_model();
        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(description) = update.description {
            active.description = Set(Some(description));
        }
        active.start_time = Set(start_time);
        active.end_time = Set(end_time);
        if let Some(venue_lat) = update.venue_lat {
            active.venue_lat = Set(venue_lat);
        }
        if let Some(venue_lng) = update.venue_lng {
            active.venue_lng = Set(venue_lng);
        }
        if let Some(venue_name) = update.venue_name {
            active.venue_name = Set(Some(venue_name));
        }
        active.updated_at = Set(Utc::now());

        let updated = Entity::update(active).exec(self.db.as_ref()).await?;
        Ok(updated.into())
    }

    async fn delete(&self, entity_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let res = Entity::delete_many()
            .filter(Column::Id.eq(id))
            .filter(Column::EntityId.eq(entity_id))
            .exec(self.db.as_ref())
            .await?;
        if res.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("event {id}")));
        }
        Ok(())
    }

    async fn transition_status(
        &self,
        entity_id: Uuid,
        id: Uuid,
        to: EventStatus,
    ) -> Result<Event, ServiceError> {
        let current = self.find_scoped(entity_id, id).await?;
        if !can_transition(&current.status, &to) {
            return Err(ServiceError::Conflict(format!(
                "event {id} cannot move from {:?} to {to:?}",
                current.status
            )));
        }

        let mut active = current.into_active_model();
        active.status = Set(to);
        active.updated_at = Set(Utc::now());
        let updated = Entity::update(active).exec(self.db.as_ref()).await?;
        Ok(updated.into())
    }
}
