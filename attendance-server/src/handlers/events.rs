use crate::{
    error::{ApiError, ResultExt},
    server::AppState,
};
use actix_web::{web, HttpRequest, HttpResponse};
use attendance_logic::{
    auth::Role,
    realtime::messages::{Envelope, MessageType},
    services::dispatch::{EventReminderPayload, EVENT_REMINDER_TASK},
    types::{EventStatus, NewEvent, NewParticipant, NewTask, UpdateEvent},
};
use chrono::Duration as ChronoDuration;
use tracing_actix_web::RequestId;
use uuid::Uuid;

/// Reminders go out this long before the event starts.
const REMINDER_LEAD_TIME: ChronoDuration = ChronoDuration::hours(1);
const REMINDER_MAX_RETRIES: i32 = 3;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/events")
            .route("", web::post().to(create))
            .route("", web::get().to(list))
            .route("/{id}", web::get().to(get))
            .route("/{id}", web::put().to(update))
            .route("/{id}", web::delete().to(delete))
            .route("/{id}/activate", web::post().to(activate))
            .route("/{id}/cancel", web::post().to(cancel))
            .route("/{id}/complete", web::post().to(complete))
            .route("/{id}/participants", web::post().to(add_participant))
            .route("/{id}/participants", web::get().to(list_participants))
            .route(
                "/{id}/participants/batch",
                web::post().to(add_participants_batch),
            )
            .route("/{id}/locations", web::get().to(latest_locations)),
    );
}

async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    body: web::Json<NewEvent>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityManager).api(request_id)?;

    let event = state
        .events
        .create(claims.entity_id, body.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(event))
}

async fn list(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;

    let events = state
        .events
        .list_by_entity(claims.entity_id)
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(events))
}

async fn get(
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
    Ok(HttpResponse::Ok().json(event))
}

async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
    body: web::Json<UpdateEvent>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityManager).api(request_id)?;

    let event = state
        .events
        .update(claims.entity_id, path.into_inner(), body.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(event))
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
        .events
        .delete(claims.entity_id, path.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().finish())
}

async fn activate(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    transition(state, req, request_id, path.into_inner(), EventStatus::Active).await
}

async fn cancel(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    transition(
        state,
        req,
        request_id,
        path.into_inner(),
        EventStatus::Cancelled,
    )
    .await
}

async fn complete(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    transition(
        state,
        req,
        request_id,
        path.into_inner(),
        EventStatus::Completed,
    )
    .await
}

async fn transition(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    event_id: Uuid,
    to: EventStatus,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityManager).api(request_id)?;

    // draft events move through scheduled on their way to active
    if to == EventStatus::Active {
        let current = state
            .events
            .get(claims.entity_id, event_id)
            .await
            .api(request_id)?;
        if current.status == EventStatus::Draft {
            state
                .events
                .transition_status(claims.entity_id, event_id, EventStatus::Scheduled)
                .await
                .api(request_id)?;
        }
    }

    let event = state
        .events
        .transition_status(claims.entity_id, event_id, to.clone())
        .await
        .api(request_id)?;

    if to == EventStatus::Active {
        let reminder = NewTask {
            entity_id: claims.entity_id,
            task_type: EVENT_REMINDER_TASK.to_string(),
            payload: serde_json::to_value(EventReminderPayload { event_id })
                .expect("payload should serialize"),
            scheduled_at: event.start_time - REMINDER_LEAD_TIME,
            max_retries: REMINDER_MAX_RETRIES,
        };
        if let Err(err) = state.scheduler.create(reminder).await {
            tracing::warn!(%event_id, error = ?err, "failed to schedule event reminder");
        }
    }

    let frame = Envelope::new(MessageType::EventUpdate, &event);
    if let Err(err) = state.bus.publish(claims.entity_id, event.id, &frame).await {
        tracing::warn!(%event_id, error = ?err, "failed to publish event update");
    }

    Ok(HttpResponse::Ok().json(event))
}

async fn add_participant(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
    body: web::Json<NewParticipant>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityManager).api(request_id)?;
    let event_id = path.into_inner();

    // the event must exist within the tenant before inviting anyone
    state
        .events
        .get(claims.entity_id, event_id)
        .await
        .api(request_id)?;
    let participant = state
        .participants
        .create(claims.entity_id, event_id, body.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(participant))
}

async fn add_participants_batch(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
    body: web::Json<Vec<NewParticipant>>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityManager).api(request_id)?;
    let event_id = path.into_inner();

    state
        .events
        .get(claims.entity_id, event_id)
        .await
        .api(request_id)?;
    let participants = state
        .participants
        .batch_create(claims.entity_id, event_id, body.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(participants))
}

async fn list_participants(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;

    let participants = state
        .participants
        .list_by_event(claims.entity_id, path.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(participants))
}

async fn latest_locations(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;

    let pings = state
        .locations
        .latest_by_event(claims.entity_id, path.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(pings))
}
