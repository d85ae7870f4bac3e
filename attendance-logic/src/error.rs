use crate::{auth::AuthError, cache::CacheError};
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited")]
    RateLimited,
    #[error("upstream unavailable: {0}")]
    Upstream(String),
    #[error("db error: {0}")]
    Db(#[from] DbErr),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        ServiceError::Upstream(err.to_string())
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InsufficientRole { .. } | AuthError::TenantMismatch => {
                ServiceError::Forbidden(err.to_string())
            }
            _ => ServiceError::Unauthenticated(err.to_string()),
        }
    }
}
