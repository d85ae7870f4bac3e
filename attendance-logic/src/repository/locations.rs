use crate::{
    error::ServiceError,
    repository::LocationRepository,
    types::{NewPing, Ping},
};
use chrono::{DateTime, Utc};
use entity::locations::{ActiveModel, Column, Entity, Model};
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    FromQueryResult, QueryFilter, QueryOrder, Statement,
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct DbLocationRepository {
    db: Arc<DatabaseConnection>,
}

impl DbLocationRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl LocationRepository for DbLocationRepository {
    async fn create(&self, new: NewPing) -> Result<Ping, ServiceError> {
        let ping = new.into_ping(Utc::now());
        let model: Model = ping.into();
        let active: ActiveModel = model.into();
        let inserted = Entity::insert(active)
            .exec_with_returning(self.db.as_ref())
            .await?;
        Ok(inserted.into())
    }

    async fn batch_create(&self, pings: Vec<Ping>) -> Result<u64, ServiceError> {
        if pings.is_empty() {
            return Ok(0);
        }

        let count = pings.len() as u64;
        let models = pings.into_iter().map(|ping| {
            let model: Model = ping.into();
            let active: ActiveModel = model.into();
            active
        });
        // replayed buffer entries are dropped instead of erroring the batch
        Entity::insert_many(models)
            .on_conflict(OnConflict::column(Column::Id).do_nothing().to_owned())
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(count)
    }

    async fn latest_by_participant(
        &self,
        entity_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Ping, ServiceError> {
        Entity::find()
            .filter(Column::EntityId.eq(entity_id))
            .filter(Column::ParticipantId.eq(participant_id))
            .order_by_desc(Column::Timestamp)
            .one(self.db.as_ref())
            .await?
            .map(Ping::from)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no location for participant {participant_id}"))
            })
    }

    async fn latest_by_event(
        &self,
        entity_id: Uuid,
        event_id: Uuid,
    ) -> Result<Vec<Ping>, ServiceError> {
        let models = Model::find_by_statement(Statement::from_sql_and_values(
            self.db.get_database_backend(),
            r#"
            SELECT DISTINCT ON (participant_id) *
            FROM locations
            WHERE entity_id = $1 AND event_id = $2
            ORDER BY participant_id, "timestamp" DESC"#,
            [entity_id.into(), event_id.into()],
        ))
        .all(self.db.as_ref())
        .await?;
        Ok(models.into_iter().map(Ping::from).collect())
    }

    async fn history(
        &self,
        entity_id: Uuid,
        participant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Ping>, ServiceError> {
        let models = Entity::find()
            .filter(Column::EntityId.eq(entity_id))
            .filter(Column::ParticipantId.eq(participant_id))
            .filter(Column::Timestamp.gte(from))
            .filter(Column::Timestamp.lte(to))
            .order_by_asc(Column::Timestamp)
            .all(self.db.as_ref())
            .await?;
        Ok(models.into_iter().map(Ping::from).collect())
    }
}
