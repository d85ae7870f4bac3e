use crate::{
    error::{ApiError, ResultExt},
    server::AppState,
};
use actix_web::{web, HttpRequest, HttpResponse};
use attendance_logic::auth::Role;
use tracing_actix_web::RequestId;
use uuid::Uuid;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/eta")
            .route("/events/{id}", web::get().to(for_event))
            .route("/participants/{id}", web::get().to(for_participant)),
    );
}

/// ETAs towards the venue for every participant of the event that has a
/// known location.
async fn for_event(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;

    let event = state
        .events
        .get(claims.entity_id, path.into_inner())
        .await
        .api(request_id)?;
    let participants = state
        .participants
        .list_by_event(claims.entity_id, event.id)
        .await
        .api(request_id)?;

    let results = state
        .eta
        .compute_many(
            claims.entity_id,
            &participants,
            event.venue_lat,
            event.venue_lng,
        )
        .await;
    Ok(HttpResponse::Ok().json(results))
}

async fn for_participant(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;

    let participant = state
        .participants
        .get(claims.entity_id, path.into_inner())
        .await
        .api(request_id)?;
    let event = state
        .events
        .get(claims.entity_id, participant.event_id)
        .await
        .api(request_id)?;

    let result = state
        .eta
        .compute(
            claims.entity_id,
            participant.id,
            event.venue_lat,
            event.venue_lng,
        )
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(result))
}
