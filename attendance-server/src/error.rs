//! Maps the service error taxonomy onto HTTP responses with a stable
//! `{"error": {"code", "message", "request_id"}}` envelope.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use attendance_logic::ServiceError;
use serde_json::json;
use thiserror::Error;
use tracing_actix_web::RequestId;

#[derive(Debug, Error)]
#[error("{source}")]
pub struct ApiError {
    #[source]
    source: ServiceError,
    request_id: Option<RequestId>,
}

impl ApiError {
    pub fn new(source: ServiceError, request_id: RequestId) -> Self {
        Self {
            source,
            request_id: Some(request_id),
        }
    }

    fn code(&self) -> &'static str {
        match &self.source {
            ServiceError::Validation(_) => "validation",
            ServiceError::Unauthenticated(_) => "unauthenticated",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::RateLimited => "rate_limited",
            ServiceError::Upstream(_) => "upstream_unavailable",
            ServiceError::Db(_) | ServiceError::Internal(_) => "internal",
        }
    }

    fn public_message(&self) -> String {
        match &self.source {
            // internals stay in the logs, not in responses
            ServiceError::Db(_) | ServiceError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Attaches the request id to any service-layer failure on its way out.
pub trait ResultExt<T> {
    fn api(self, request_id: RequestId) -> Result<T, ApiError>;
}

impl<T, E: Into<ServiceError>> ResultExt<T> for Result<T, E> {
    fn api(self, request_id: RequestId) -> Result<T, ApiError> {
        self.map_err(|err| ApiError::new(err.into(), request_id))
    }
}

impl From<ServiceError> for ApiError {
    fn from(source: ServiceError) -> Self {
        Self {
            source,
            request_id: None,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.source {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Db(_) | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let request_id = self
            .request_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        if self.status_code().is_server_error() {
            tracing::error!(%request_id, error = ?self.source, "request failed");
        }
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
                "request_id": request_id,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_error_kind_maps_to_its_documented_status() {
        let cases = [
            (ServiceError::Validation("x".into()), 400),
            (ServiceError::Unauthenticated("x".into()), 401),
            (ServiceError::Forbidden("x".into()), 403),
            (ServiceError::NotFound("x".into()), 404),
            (ServiceError::Conflict("x".into()), 409),
            (ServiceError::RateLimited, 429),
            (ServiceError::Upstream("x".into()), 503),
            (ServiceError::Internal(anyhow::anyhow!("boom")), 500),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code().as_u16(), status);
        }
    }

    #[test]
    fn internal_details_never_reach_the_client() {
        let err = ApiError::from(ServiceError::Internal(anyhow::anyhow!(
            "password=hunter2 leaked"
        )));
        assert_eq!(err.public_message(), "internal error");
    }
}
