//! One long-lived dashboard connection: a read pump enforcing liveness and
//! a write pump draining the hub-fed outbound buffer.

use crate::realtime::{
    hub::{Hub, SessionHandle},
    messages::{Envelope, MessageType},
};
use actix_ws::{AggregatedMessage, AggregatedMessageStream, CloseReason, Session};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::time::{interval, timeout};
use uuid::Uuid;

/// Deadline for a single outbound write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection with no heartbeat response for this long is dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Protocol ping cadence, 90% of the client timeout.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(54);

/// How often the read pump re-checks liveness.
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Inbound frames above this size are rejected by the stream aggregation.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Registers a session with the hub and spawns its read and write pumps on
/// the connection's runtime. Returns the fresh session id.
pub fn spawn_session(
    hub: Hub,
    ws_session: Session,
    msg_stream: AggregatedMessageStream,
    entity_id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
) -> Uuid {
    let (handle, outbound) = hub.open_session(entity_id, event_id, user_id);
    let session_id = handle.id;

    actix_web::rt::spawn(write_pump(ws_session.clone(), outbound));
    actix_web::rt::spawn(read_pump(hub, handle, ws_session, msg_stream));

    session_id
}

/// Drains inbound frames, answering pings and tracking liveness. Any read
/// error or heartbeat timeout ends the session via hub unregister, which
/// closes the outbound buffer and thereby stops the write pump.
async fn read_pump(
    hub: Hub,
    handle: SessionHandle,
    mut ws_session: Session,
    msg_stream: AggregatedMessageStream,
) {
    let mut msg_stream = std::pin::pin!(msg_stream);
    let mut last_heartbeat = Instant::now();
    let mut liveness = interval(LIVENESS_CHECK_INTERVAL);

    loop {
        tokio::select! {
            maybe_msg = msg_stream.next() => {
                match maybe_msg {
                    Some(Ok(AggregatedMessage::Text(text))) => {
                        last_heartbeat = Instant::now();
                        if let Some(reply) = handle_incoming(&text) {
                            handle.enqueue(reply);
                        }
                    }
                    Some(Ok(AggregatedMessage::Ping(bytes))) => {
                        last_heartbeat = Instant::now();
                        if ws_session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(AggregatedMessage::Pong(_))) => {
                        last_heartbeat = Instant::now();
                    }
                    Some(Ok(AggregatedMessage::Binary(_))) => {
                        // text protocol only
                        last_heartbeat = Instant::now();
                    }
                    Some(Ok(AggregatedMessage::Close(_))) | Some(Err(_)) | None => break,
                }
            }
            _ = liveness.tick() => {
                if last_heartbeat.elapsed() > CLIENT_TIMEOUT {
                    tracing::debug!(session_id = %handle.id, "heartbeat timeout");
                    break;
                }
            }
        }
    }

    hub.unregister(&handle);
}

/// Writes outbound frames strictly in enqueue order and emits protocol
/// pings. When the hub closes the buffer the pump sends a close frame and
/// exits.
async fn write_pump(mut ws_session: Session, outbound: async_channel::Receiver<String>) {
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    // the interval fires immediately; skip that first tick
    heartbeat.reset();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Ok(text) => {
                        match timeout(WRITE_TIMEOUT, ws_session.text(text)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) | Err(_) => {
                                tracing::debug!("outbound write failed, closing session");
                                return;
                            }
                        }
                    }
                    Err(_) => {
                        // buffer closed by the hub (unregister or eviction)
                        let _ = ws_session.close(Some(CloseReason::from(actix_ws::CloseCode::Normal))).await;
                        return;
                    }
                }
            }
            _ = heartbeat.tick() => {
                match timeout(WRITE_TIMEOUT, ws_session.ping(b"")).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => return,
                }
            }
        }
    }
}

/// Processes one inbound text frame; a `ping` envelope earns a `pong` reply
/// stamped with the current time. Malformed frames are ignored.
fn handle_incoming(raw: &str) -> Option<String> {
    let envelope = Envelope::from_json(raw).ok()?;
    match envelope.kind {
        MessageType::Ping => Envelope::pong().to_json().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_frames_earn_a_pong() {
        let reply = handle_incoming(
            r#"{"type":"ping","timestamp":"2024-05-10T12:00:00Z","data":{}}"#,
        )
        .unwrap();
        let envelope = Envelope::from_json(&reply).unwrap();
        assert_eq!(envelope.kind, MessageType::Pong);
    }

    #[test]
    fn other_frames_are_not_answered() {
        assert_eq!(
            handle_incoming(r#"{"type":"pong","timestamp":"2024-05-10T12:00:00Z","data":{}}"#),
            None
        );
        assert_eq!(handle_incoming("not json"), None);
    }

    #[test]
    fn ping_period_is_ninety_percent_of_the_client_timeout() {
        assert_eq!(HEARTBEAT_INTERVAL.as_secs() * 10, CLIENT_TIMEOUT.as_secs() * 9);
    }
}
