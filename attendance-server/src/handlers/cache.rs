//! Dashboard bootstrap reads served from the shared cache.

use crate::{
    error::{ApiError, ResultExt},
    server::AppState,
};
use actix_web::{web, HttpRequest, HttpResponse};
use attendance_logic::{auth::Role, types::Participant};
use serde::Serialize;
use serde_json::json;
use tracing_actix_web::RequestId;
use uuid::Uuid;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/cache/{event}")
            .route("", web::get().to(snapshot))
            .route("/locations", web::get().to(locations))
            .route("/confirmations", web::get().to(confirmations)),
    );
}

#[derive(Serialize)]
struct Confirmation {
    participant_id: Uuid,
    participant_name: String,
    status: attendance_logic::types::ParticipantStatus,
}

impl From<&Participant> for Confirmation {
    fn from(p: &Participant) -> Self {
        Self {
            participant_id: p.id,
            participant_name: p.name.clone(),
            status: p.status.clone(),
        }
    }
}

async fn snapshot(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;
    let event_id = path.into_inner();

    let participants = event_participants(&state, claims.entity_id, event_id, request_id).await?;
    let pings = state
        .cache
        .get_latest_many(
            event_id,
            &participants.iter().map(|p| p.id).collect::<Vec<_>>(),
        )
        .await
        .api(request_id)?;
    let confirmations = participants.iter().map(Confirmation::from).collect::<Vec<_>>();

    Ok(HttpResponse::Ok().json(json!({
        "locations": pings,
        "confirmations": confirmations,
    })))
}

async fn locations(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;
    let event_id = path.into_inner();

    let participants = event_participants(&state, claims.entity_id, event_id, request_id).await?;
    let pings = state
        .cache
        .get_latest_many(
            event_id,
            &participants.iter().map(|p| p.id).collect::<Vec<_>>(),
        )
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(pings))
}

async fn confirmations(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;

    let participants =
        event_participants(&state, claims.entity_id, path.into_inner(), request_id).await?;
    let confirmations = participants.iter().map(Confirmation::from).collect::<Vec<_>>();
    Ok(HttpResponse::Ok().json(confirmations))
}

async fn event_participants(
    state: &AppState,
    entity_id: Uuid,
    event_id: Uuid,
    request_id: RequestId,
) -> Result<Vec<Participant>, ApiError> {
    // resolves tenancy as a side effect: a foreign event 404s here
    state.events.get(entity_id, event_id).await.api(request_id)?;
    state
        .participants
        .list_by_event(entity_id, event_id)
        .await
        .api(request_id)
}
