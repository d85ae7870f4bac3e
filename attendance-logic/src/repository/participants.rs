use crate::{
    error::ServiceError,
    repository::ParticipantRepository,
    types::{NewParticipant, Participant, ParticipantStatus, UpdateParticipant},
};
use chrono::Utc;
use entity::participants::{ActiveModel, Column, Entity, Model};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, SqlErr, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct DbParticipantRepository {
    db: Arc<DatabaseConnection>,
}

impl DbParticipantRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_scoped(&self, entity_id: Uuid, id: Uuid) -> Result<Model, ServiceError> {
        Entity::find_by_id(id)
            .filter(Column::EntityId.eq(entity_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("participant {id}")))
    }

    fn fresh_model(entity_id: Uuid, event_id: Uuid, new: NewParticipant) -> ActiveModel {
        let now = Utc::now();
        ActiveModel {
            id: Set(Uuid::new_v4()),
            entity_id: Set(entity_id),
            event_id: Set(event_id),
            name: Set(new.name),
            phone_number: Set(new.phone_number),
            status: Set(ParticipantStatus::Pending),
            confirmed_at: Set(None),
            checked_in_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
    }

    fn map_duplicate(event_id: Uuid, err: sea_orm::DbErr) -> ServiceError {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::Conflict(format!(
                "phone number already invited to event {event_id}"
            )),
            _ => err.into(),
        }
    }
}

#[async_trait::async_trait]
impl ParticipantRepository for DbParticipantRepository {
    async fn create(
        &self,
        entity_id: Uuid,
        event_id: Uuid,
        new: NewParticipant,
    ) -> Result<Participant, ServiceError> {
        let model = Self::fresh_model(entity_id, event_id, new);
        Entity::insert(model)
            .exec_with_returning(self.db.as_ref())
            .await
            .map(Participant::from)
            .map_err(|err| Self::map_duplicate(event_id, err))
    }

    async fn batch_create(
        &self,
        entity_id: Uuid,
        event_id: Uuid,
        new: Vec<NewParticipant>,
    ) -> Result<Vec<Participant>, ServiceError> {
        if new.is_empty() {
            return Ok(vec![]);
        }

        // all-or-nothing so a single duplicate rejects the whole batch
        let txn = self.db.begin().await?;
        let mut created = Vec::with_capacity(new.len());
        for participant in new {
            let model = Self::fresh_model(entity_id, event_id, participant);
            let inserted = Entity::insert(model)
                .exec_with_returning(&txn)
                .await
                .map_err(|err| Self::map_duplicate(event_id, err))?;
            created.push(Participant::from(inserted));
        }
        txn.commit().await?;
        Ok(created)
    }

    async fn get(&self, entity_id: Uuid, id: Uuid) -> Result<Participant, ServiceError> {
        self.find_scoped(entity_id, id).await.map(Participant::from)
    }

    async fn list_by_event(
        &self,
        entity_id: Uuid,
        event_id: Uuid,
    ) -> Result<Vec<Participant>, ServiceError> {
        let models = Entity::find()
            .filter(Column::EntityId.eq(entity_id))
            .filter(Column::EventId.eq(event_id))
            .order_by_asc(Column::Name)
            .all(self.db.as_ref())
            .await?;
        Ok(models.into_iter().map(Participant::from).collect())
    }

    async fn update(
        &self,
        entity_id: Uuid,
        id: Uuid,
        update: UpdateParticipant,
    ) -> Result<Participant, ServiceError> {
        let current = self.find_scoped(entity_id, id).await?;
        let event_id = current.event_id;

        let mut active = current.into_active_model();
        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(phone_number) = update.phone_number {
            active.phone_number = Set(phone_number);
        }
        active.updated_at = Set(Utc::now());

        Entity::update(active)
            .exec(self.db.as_ref())
            .await
            .map(Participant::from)
            .map_err(|err| Self::map_duplicate(event_id, err))
    }

    async fn delete(&self, entity_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let res = Entity::delete_many()
            .filter(Column::Id.eq(id))
            .filter(Column::EntityId.eq(entity_id))
            .exec(self.db.as_ref())
            .await?;
        if res.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("participant {id}")));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        entity_id: Uuid,
        id: Uuid,
        status: ParticipantStatus,
    ) -> Result<Participant, ServiceError> {
        let current = self.find_scoped(entity_id, id).await?;
        let now = Utc::now();

        let mut active = current.into_active_model();
        match status {
            ParticipantStatus::Confirmed => active.confirmed_at = Set(Some(now)),
            ParticipantStatus::CheckedIn => active.checked_in_at = Set(Some(now)),
            _ => {}
        }
        active.status = Set(status);
        active.updated_at = Set(now);

        let updated = Entity::update(active).exec(self.db.as_ref()).await?;
        Ok(updated.into())
    }

    async fn lookup_by_phone(
        &self,
        entity_id: Uuid,
        phone_number: &str,
    ) -> Result<Vec<Participant>, ServiceError> {
        let models = Entity::find()
            .filter(Column::EntityId.eq(entity_id))
            .filter(Column::PhoneNumber.eq(phone_number))
            .order_by_desc(Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(models.into_iter().map(Participant::from).collect())
    }
}
