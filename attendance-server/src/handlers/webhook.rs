//! Public WhatsApp webhook: the subscription handshake and the inbound
//! event payload. Inbound failures are logged and acknowledged with 200 so
//! the platform does not hammer retries; durable state converges through
//! the buffer drain.

use crate::{handlers::participants::publish_status_change, server::AppState};
use actix_web::{web, HttpResponse};
use attendance_logic::{
    clients::whatsapp::{InboundMessage, VerifyQuery, WebhookPayload},
    error::ServiceError,
    types::{EventStatus, NewPing, Participant, ParticipantStatus, Tenant},
};
use chrono::Utc;
use serde_json::json;

pub async fn verify(
    state: web::Data<AppState>,
    query: web::Query<VerifyQuery>,
) -> HttpResponse {
    if query.matches(&state.whatsapp_verify_token) {
        HttpResponse::Ok().body(query.into_inner().challenge)
    } else {
        tracing::warn!("webhook verification failed");
        HttpResponse::Forbidden().finish()
    }
}

pub async fn receive(
    state: web::Data<AppState>,
    payload: web::Json<WebhookPayload>,
) -> HttpResponse {
    for (phone_number_id, message) in payload.messages() {
        if let Err(err) = handle_message(&state, phone_number_id, message).await {
            tracing::warn!(
                message_id = %message.id,
                from = %message.from,
                error = ?err,
                "inbound message dropped"
            );
        }
    }
    HttpResponse::Ok().json(json!({ "status": "received" }))
}

async fn handle_message(
    state: &AppState,
    phone_number_id: &str,
    message: &InboundMessage,
) -> Result<(), ServiceError> {
    let tenant = state
        .entities
        .find_by_phone_number_id(phone_number_id)
        .await?;
    let participant = resolve_participant(state, &tenant, &message.from).await?;

    match message.kind.as_str() {
        "location" => {
            let location = message.location.as_ref().ok_or_else(|| {
                ServiceError::Validation("location message without coordinates".into())
            })?;
            state
                .ingress
                .buffer_ping(NewPing {
                    entity_id: tenant.id,
                    event_id: participant.event_id,
                    participant_id: participant.id,
                    lat: location.latitude,
                    lng: location.longitude,
                    timestamp: message.timestamp_utc().unwrap_or_else(Utc::now),
                })
                .await?;
            Ok(())
        }
        "text" | "button" | "interactive" => {
            let Some(keyword) = message.reply_keyword() else {
                return Ok(());
            };
            let status = match keyword.as_str() {
                "confirm" | "yes" | "sim" => ParticipantStatus::Confirmed,
                "decline" | "no" | "nao" | "não" => ParticipantStatus::Declined,
                other => {
                    tracing::debug!(keyword = other, "ignoring unrecognized reply");
                    return Ok(());
                }
            };
            let participant = state
                .participants
                .update_status(tenant.id, participant.id, status)
                .await?;
            publish_status_change(state, &participant).await;
            Ok(())
        }
        other => {
            tracing::debug!(kind = other, "ignoring unsupported message type");
            Ok(())
        }
    }
}

/// Picks the invitation the sender most plausibly answers for: the first
/// one attached to a live (active, else scheduled) event.
async fn resolve_participant(
    state: &AppState,
    tenant: &Tenant,
    phone_number: &str,
) -> Result<Participant, ServiceError> {
    let invitations = state
        .participants
        .lookup_by_phone(tenant.id, phone_number)
        .await?;
    if invitations.is_empty() {
        return Err(ServiceError::NotFound(format!(
            "no invitation for {phone_number}"
        )));
    }

    let mut scheduled = None;
    for invitation in invitations {
        let event = state.events.get(tenant.id, invitation.event_id).await?;
        match event.status {
            EventStatus::Active => return Ok(invitation),
            EventStatus::Scheduled if scheduled.is_none() => scheduled = Some(invitation),
            _ => {}
        }
    }
    scheduled.ok_or_else(|| {
        ServiceError::NotFound(format!("no live event invitation for {phone_number}"))
    })
}
