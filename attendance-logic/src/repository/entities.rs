use crate::{
    error::ServiceError,
    repository::EntityRepository,
    types::{NewTenant, Tenant, UpdateTenant},
};
use chrono::Utc;
use entity::entities::{ActiveModel, Column, Entity};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, SqlErr,
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct DbEntityRepository {
    db: Arc<DatabaseConnection>,
}

impl DbEntityRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn map_duplicate(err: sea_orm::DbErr) -> ServiceError {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::Conflict("whatsapp phone number id already in use".into())
            }
            _ => err.into(),
        }
    }
}

#[async_trait::async_trait]
impl EntityRepository for DbEntityRepository {
    async fn create(&self, new: NewTenant) -> Result<Tenant, ServiceError> {
        let now = Utc::now();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(new.name),
            whatsapp_phone_number_id: Set(new.whatsapp_phone_number_id),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Entity::insert(model)
            .exec_with_returning(self.db.as_ref())
            .await
            .map(Tenant::from)
            .map_err(Self::map_duplicate)
    }

    async fn get(&self, id: Uuid) -> Result<Tenant, ServiceError> {
        Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(Tenant::from)
            .ok_or_else(|| ServiceError::NotFound(format!("entity {id}")))
    }

    async fn list(&self) -> Result<Vec<Tenant>, ServiceError> {
        let models = Entity::find()
            .order_by_asc(Column::Name)
            .all(self.db.as_ref())
            .await?;
        Ok(models.into_iter().map(Tenant::from).collect())
    }

    async fn update(&self, id: Uuid, update: UpdateTenant) -> Result<Tenant, ServiceError> {
        let current = Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("entity {id}")))?;

        let mut active = current.into_active_model();
        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(phone_number_id) = update.whatsapp_phone_number_id {
            active.whatsapp_phone_number_id = Set(Some(phone_number_id));
        }
        active.updated_at = Set(Utc::now());

        Entity::update(active)
            .exec(self.db.as_ref())
            .await
            .map(Tenant::from)
            .map_err(Self::map_duplicate)
    }

    async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let res = Entity::delete_by_id(id).exec(self.db.as_ref()).await?;
        if res.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    async fn find_by_phone_number_id(
        &self,
        phone_number_id: &str,
    ) -> Result<Tenant, ServiceError> {
        Entity::find()
            .filter(Column::WhatsappPhoneNumberId.eq(phone_number_id))
            .one(self.db.as_ref())
            .await?
            .map(Tenant::from)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("entity with phone number id {phone_number_id}"))
            })
    }
}
