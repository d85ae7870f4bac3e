use crate::{
    error::ServiceError,
    repository::SchedulerRepository,
    types::{NewTask, Task, TaskStatus},
};
use chrono::{DateTime, Utc};
use entity::scheduler_tasks::{ActiveModel, Column, Entity};
use sea_orm::{
    prelude::Expr, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct DbSchedulerRepository {
    db: Arc<DatabaseConnection>,
}

impl DbSchedulerRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl SchedulerRepository for DbSchedulerRepository {
    async fn create(&self, new: NewTask) -> Result<Task, ServiceError> {
        if new.max_retries < 0 {
            return Err(ServiceError::Validation(
                "max_retries must not be negative".into(),
            ));
        }

        let now = Utc::now();
        let active = ActiveModel {
            id: Set(Uuid::new_v4()),
            entity_id: Set(new.entity_id),
            task_type: Set(new.task_type),
            payload: Set(new.payload),
            status: Set(TaskStatus::Pending),
            scheduled_at: Set(new.scheduled_at),
            retries: Set(0),
            max_retries: Set(new.max_retries),
            last_error: Set(None),
            processed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let inserted = Entity::insert(active)
            .exec_with_returning(self.db.as_ref())
            .await?;
        Ok(inserted.into())
    }

    async fn get(&self, id: Uuid) -> Result<Task, ServiceError> {
        Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(Task::from)
            .ok_or_else(|| ServiceError::NotFound(format!("scheduler task {id}")))
    }

    async fn list_pending(
        &self,
        before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Task>, ServiceError> {
        let models = Entity::find()
            .filter(Column::Status.eq(TaskStatus::Pending))
            .filter(Column::ScheduledAt.lte(before))
            .filter(Expr::col(Column::Retries).lt(Expr::col(Column::MaxRetries)))
            .order_by_asc(Column::ScheduledAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;
        Ok(models.into_iter().map(Task::from).collect())
    }

    async fn claim(&self, id: Uuid) -> Result<bool, ServiceError> {
        let res = Entity::update_many()
            .col_expr(Column::Status, Expr::value(TaskStatus::Processing))
            .col_expr(Column::UpdatedAt, Expr::current_timestamp().into())
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(TaskStatus::Pending))
            .exec(self.db.as_ref())
            .await?;
        Ok(res.rows_affected == 1)
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), ServiceError> {
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(TaskStatus::Processed))
            .col_expr(Column::ProcessedAt, Expr::current_timestamp().into())
            .col_expr(Column::UpdatedAt, Expr::current_timestamp().into())
            .filter(Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), ServiceError> {
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(TaskStatus::Failed))
            .col_expr(Column::LastError, Expr::value(Some(error.to_string())))
            .col_expr(Column::UpdatedAt, Expr::current_timestamp().into())
            .filter(Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn increment_retries(&self, id: Uuid, error: &str) -> Result<i32, ServiceError> {
        Entity::update_many()
            .col_expr(Column::Retries, Expr::col(Column::Retries).add(1))
            .col_expr(Column::Status, Expr::value(TaskStatus::Pending))
            .col_expr(Column::LastError, Expr::value(Some(error.to_string())))
            .col_expr(Column::UpdatedAt, Expr::current_timestamp().into())
            .filter(Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;

        self.get(id).await.map(|task| task.retries)
    }
}
