use crate::{
    error::{ApiError, ResultExt},
    server::AppState,
};
use actix_web::{web, HttpRequest, HttpResponse};
use attendance_logic::{auth::Role, types::NewPing};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tracing_actix_web::RequestId;
use uuid::Uuid;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/participants/{id}/locations")
            .route("", web::post().to(record))
            .route("", web::get().to(history))
            .route("/latest", web::get().to(latest)),
    );
}

#[derive(Debug, Deserialize)]
struct NewPingBody {
    lat: f64,
    lng: f64,
    timestamp: Option<DateTime<Utc>>,
}

async fn record(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
    body: web::Json<NewPingBody>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityOperator).api(request_id)?;
    let participant_id = path.into_inner();

    let participant = state
        .participants
        .get(claims.entity_id, participant_id)
        .await
        .api(request_id)?;

    let body = body.into_inner();
    let ping = state
        .ingress
        .record_ping(NewPing {
            entity_id: claims.entity_id,
            event_id: participant.event_id,
            participant_id,
            lat: body.lat,
            lng: body.lng,
            timestamp: body.timestamp.unwrap_or_else(Utc::now),
        })
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(ping))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn history(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;

    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - ChronoDuration::hours(24));
    let pings = state
        .locations
        .history(claims.entity_id, path.into_inner(), from, to)
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(pings))
}

/// Latest known position, served from the cache with a read-through to
/// postgres on a cache miss.
async fn latest(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;
    let participant_id = path.into_inner();

    let participant = state
        .participants
        .get(claims.entity_id, participant_id)
        .await
        .api(request_id)?;

    let cached = state
        .cache
        .get_latest(participant.event_id, participant_id)
        .await
        .api(request_id)?;
    let ping = match cached {
        Some(ping) => ping,
        None => {
            let ping = state
                .locations
                .latest_by_participant(claims.entity_id, participant_id)
                .await
                .api(request_id)?;
            // warm the cache for the next reader; the row is already durable
            let event = state
                .events
                .get(claims.entity_id, participant.event_id)
                .await
                .api(request_id)?;
            if let Err(err) = state.cache.set_latest(&ping, event.end_time).await {
                tracing::warn!(%participant_id, error = ?err, "failed to warm the latest-location cache");
            }
            ping
        }
    };
    Ok(HttpResponse::Ok().json(ping))
}
