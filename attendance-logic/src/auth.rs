//! Access-token verification and the role hierarchy.
//!
//! Token issuance (login, refresh) lives in an external auth service; this
//! module only verifies the HS256 access tokens it mints.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    EntityOwner,
    EntityAdmin,
    EntityManager,
    EntityOperator,
    EntityViewer,
}

impl Role {
    pub fn level(&self) -> u8 {
        match self {
            Role::SuperAdmin => 6,
            Role::EntityOwner => 5,
            Role::EntityAdmin => 4,
            Role::EntityManager => 3,
            Role::EntityOperator => 2,
            Role::EntityViewer => 1,
        }
    }

    pub fn allows(&self, required: Role) -> bool {
        self.level() >= required.level()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id.
    pub sub: Uuid,
    /// Tenant the token is scoped to.
    pub entity_id: Uuid,
    pub role: Role,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

impl AccessClaims {
    /// Tenant check: super admins cross tenant boundaries, everyone else
    /// stays inside their own.
    pub fn authorize_tenant(&self, entity_id: Uuid) -> Result<(), AuthError> {
        if self.role == Role::SuperAdmin || self.entity_id == entity_id {
            Ok(())
        } else {
            Err(AuthError::TenantMismatch)
        }
    }

    pub fn require_role(&self, required: Role) -> Result<(), AuthError> {
        if self.role.allows(required) {
            Ok(())
        } else {
            Err(AuthError::InsufficientRole {
                required,
                actual: self.role,
            })
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing access token")]
    MissingToken,
    #[error("invalid access token: {0}")]
    InvalidToken(String),
    #[error("access token expired")]
    Expired,
    #[error("role {actual:?} does not satisfy required role {required:?}")]
    InsufficientRole { required: Role, actual: Role },
    #[error("token is scoped to another tenant")]
    TenantMismatch,
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<AccessClaims, AuthError>;
}

pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<AccessClaims, AuthError> {
        jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(err.to_string()),
            })
    }
}
