use crate::{
    error::{ApiError, ResultExt},
    server::AppState,
};
use actix_web::{web, HttpRequest, HttpResponse};
use attendance_logic::{
    auth::Role,
    services::ingress::participant_status_frame,
    realtime::messages::MessageType,
    types::{Participant, ParticipantStatus, UpdateParticipant},
};
use tracing_actix_web::RequestId;
use uuid::Uuid;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/participants")
            .route("/{id}", web::get().to(get))
            .route("/{id}", web::put().to(update))
            .route("/{id}", web::delete().to(delete))
            .route("/{id}/confirm", web::post().to(confirm))
            .route("/{id}/check-in", web::post().to(check_in)),
    );
}

async fn get(
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
    Ok(HttpResponse::Ok().json(participant))
}

async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
    body: web::Json<UpdateParticipant>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityManager).api(request_id)?;

    let participant = state
        .participants
        .update(claims.entity_id, path.into_inner(), body.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(participant))
}

async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityAdmin).api(request_id)?;

    state
        .participants
        .delete(claims.entity_id, path.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().finish())
}

async fn confirm(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    set_status(
        state,
        req,
        request_id,
        path.into_inner(),
        ParticipantStatus::Confirmed,
    )
    .await
}

async fn check_in(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    set_status(
        state,
        req,
        request_id,
        path.into_inner(),
        ParticipantStatus::CheckedIn,
    )
    .await
}

async fn set_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    participant_id: Uuid,
    status: ParticipantStatus,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityOperator).api(request_id)?;

    let participant = state
        .participants
        .update_status(claims.entity_id, participant_id, status)
        .await
        .api(request_id)?;

    publish_status_change(&state, &participant).await;
    Ok(HttpResponse::Ok().json(participant))
}

/// Mirrors an attendance change to the dashboards of the event. Confirm and
/// check-in surface as joins, a decline as a leave.
pub async fn publish_status_change(state: &AppState, participant: &Participant) {
    let kind = match participant.status {
        ParticipantStatus::Declined | ParticipantStatus::NoShow => MessageType::ParticipantLeave,
        _ => MessageType::ParticipantJoin,
    };
    let frame = participant_status_frame(participant, kind);
    if let Err(err) = state
        .bus
        .publish(participant.entity_id, participant.event_id, &frame)
        .await
    {
        tracing::warn!(participant_id = %participant.id, error = ?err, "failed to publish attendance change");
    }
}
