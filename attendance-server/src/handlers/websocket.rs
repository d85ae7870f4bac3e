use crate::{
    error::{ApiError, ResultExt},
    server::AppState,
};
use actix_web::{web, HttpRequest, HttpResponse};
use attendance_logic::{
    auth::Role,
    realtime::session::{spawn_session, MAX_FRAME_SIZE},
};
use tracing_actix_web::RequestId;
use uuid::Uuid;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws/{event}", web::get().to(connect));
}

/// Upgrades a dashboard connection. The bearer token may arrive as a
/// `token` query parameter since browsers cannot set websocket headers.
async fn connect(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
    body: web::Payload,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::EntityViewer).api(request_id)?;

    // a foreign or unknown event 404s before the upgrade
    let event = state
        .events
        .get(claims.entity_id, path.into_inner())
        .await
        .api(request_id)?;

    let (response, ws_session, msg_stream) =
        actix_ws::handle(&req, body).map_err(|err| {
            ApiError::new(
                attendance_logic::ServiceError::Validation(format!(
                    "websocket upgrade failed: {err}"
                )),
                request_id,
            )
        })?;
    let msg_stream = msg_stream
        .aggregate_continuations()
        .max_continuation_size(MAX_FRAME_SIZE);

    let session_id = spawn_session(
        state.hub.clone(),
        ws_session,
        msg_stream,
        claims.entity_id,
        event.id,
        claims.sub,
    );
    tracing::debug!(%session_id, event_id = %event.id, "dashboard connected");

    Ok(response)
}
