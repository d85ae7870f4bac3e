//! In-process fan-out hub.
//!
//! Owns every live dashboard session, keyed by (tenant, event). Three
//! control channels feed a single task; broadcasts take the read lock and
//! never await a client. A session whose bounded outbound buffer is full is
//! evicted on the spot.

use crate::metrics;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use uuid::Uuid;

/// (tenant, event) room a session belongs to.
pub type RoomKey = (Uuid, Uuid);

/// Per-session outbound buffer capacity.
pub const OUTBOUND_QUEUE: usize = 256;

/// Hub broadcast queue capacity.
const BROADCAST_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    sender: async_channel::Sender<String>,
}

impl SessionHandle {
    pub fn room(&self) -> RoomKey {
        (self.entity_id, self.event_id)
    }

    /// Non-blocking enqueue onto the own outbound buffer. Used by the read
    /// pump to answer application-level pings; false means the buffer is
    /// full or closed and the frame was dropped.
    pub fn enqueue(&self, frame: String) -> bool {
        self.sender.try_send(frame).is_ok()
    }
}

type Rooms = Arc<RwLock<HashMap<RoomKey, HashMap<Uuid, SessionHandle>>>>;

#[derive(Clone)]
pub struct Hub {
    rooms: Rooms,
    register_tx: mpsc::UnboundedSender<SessionHandle>,
    unregister_tx: mpsc::UnboundedSender<(RoomKey, Uuid)>,
    broadcast_tx: mpsc::Sender<(RoomKey, String)>,
}

/// The consuming half of the hub; `run` it on its own task.
pub struct HubRunner {
    rooms: Rooms,
    register_rx: mpsc::UnboundedReceiver<SessionHandle>,
    unregister_rx: mpsc::UnboundedReceiver<(RoomKey, Uuid)>,
    broadcast_rx: mpsc::Receiver<(RoomKey, String)>,
}

impl Hub {
    pub fn new() -> (Self, HubRunner) {
        let rooms: Rooms = Default::default();
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE);

        let hub = Self {
            rooms: Arc::clone(&rooms),
            register_tx,
            unregister_tx,
            broadcast_tx,
        };
        let runner = HubRunner {
            rooms,
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        (hub, runner)
    }

    /// Creates a session handle with a fresh id and a bounded outbound
    /// buffer, and registers it with the hub. The receiver end belongs to
    /// the session's write pump.
    pub fn open_session(
        &self,
        entity_id: Uuid,
        event_id: Uuid,
        user_id: Uuid,
    ) -> (SessionHandle, async_channel::Receiver<String>) {
        let (sender, receiver) = async_channel::bounded(OUTBOUND_QUEUE);
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            entity_id,
            event_id,
            user_id,
            sender,
        };
        // the runner only stops at shutdown, when sessions are gone anyway
        let _ = self.register_tx.send(handle.clone());
        (handle, receiver)
    }

    pub fn unregister(&self, handle: &SessionHandle) {
        let _ = self.unregister_tx.send((handle.room(), handle.id));
    }

    /// Enqueues a marshaled frame for every session of the room; delivery is
    /// asynchronous and never waits on a slow client.
    pub async fn broadcast(&self, entity_id: Uuid, event_id: Uuid, frame: String) {
        if self
            .broadcast_tx
            .send(((entity_id, event_id), frame))
            .await
            .is_err()
        {
            tracing::warn!(%entity_id, %event_id, "hub is not running, dropping broadcast");
        }
    }

    pub fn client_count(&self, entity_id: Uuid, event_id: Uuid) -> usize {
        self.rooms
            .read()
            .get(&(entity_id, event_id))
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }
}

impl HubRunner {
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(handle) = self.register_rx.recv() => self.register(handle),
                Some((room, id)) = self.unregister_rx.recv() => self.remove(room, id),
                Some((room, frame)) = self.broadcast_rx.recv() => self.fan_out(room, frame),
                else => break,
            }
        }
        tracing::debug!("hub loop stopped");
    }

    fn register(&self, handle: SessionHandle) {
        tracing::debug!(session_id = %handle.id, entity_id = %handle.entity_id, event_id = %handle.event_id, "session registered");
        metrics::WS_SESSIONS.inc();
        self.rooms
            .write()
            .entry(handle.room())
            .or_default()
            .insert(handle.id, handle);
    }

    /// Removes the session and closes its outbound buffer. The map entry
    /// guards the close: a session can only be removed once.
    fn remove(&self, room: RoomKey, id: Uuid) {
        let mut rooms = self.rooms.write();
        if let Some(sessions) = rooms.get_mut(&room) {
            if let Some(handle) = sessions.remove(&id) {
                handle.sender.close();
                metrics::WS_SESSIONS.dec();
                tracing::debug!(session_id = %id, "session unregistered");
            }
            if sessions.is_empty() {
                rooms.remove(&room);
            }
        }
    }

    fn fan_out(&self, room: RoomKey, frame: String) {
        let evicted = {
            let rooms = self.rooms.read();
            let Some(sessions) = rooms.get(&room) else {
                return;
            };
            sessions
                .values()
                .filter(|handle| handle.sender.try_send(frame.clone()).is_err())
                .map(|handle| handle.id)
                .collect::<Vec<_>>()
        };

        for id in evicted {
            tracing::warn!(session_id = %id, "evicting slow consumer");
            metrics::WS_EVICTED_SESSIONS_TOTAL.inc();
            self.remove(room, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn start_hub() -> Hub {
        let (hub, runner) = Hub::new();
        tokio::spawn(runner.run());
        hub
    }

    async fn wait_for_count(hub: &Hub, entity: Uuid, event: Uuid, expected: usize) {
        for _ in 0..200 {
            if hub.client_count(entity, event) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "client_count never reached {expected}, still {}",
            hub.client_count(entity, event)
        );
    }

    #[tokio::test]
    async fn delivers_broadcasts_in_enqueue_order() {
        let hub = start_hub();
        let (entity, event) = (Uuid::new_v4(), Uuid::new_v4());
        let (_handle, rx) = hub.open_session(entity, event, Uuid::new_v4());
        wait_for_count(&hub, entity, event, 1).await;

        for i in 0..10 {
            hub.broadcast(entity, event, format!("frame-{i}")).await;
        }
        for i in 0..10 {
            assert_eq!(rx.recv().await.unwrap(), format!("frame-{i}"));
        }
    }

    #[tokio::test]
    async fn broadcasts_stay_inside_their_room() {
        let hub = start_hub();
        let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
        let event = Uuid::new_v4();
        let (_a, rx_a) = hub.open_session(tenant_a, event, Uuid::new_v4());
        let (_b, rx_b) = hub.open_session(tenant_b, event, Uuid::new_v4());
        wait_for_count(&hub, tenant_a, event, 1).await;
        wait_for_count(&hub, tenant_b, event, 1).await;

        hub.broadcast(tenant_a, event, "only-for-a".into()).await;

        assert_eq!(rx_a.recv().await.unwrap(), "only-for-a");
        assert!(rx_b.is_empty());
    }

    #[tokio::test]
    async fn evicts_a_slow_consumer_and_closes_its_buffer() {
        let hub = start_hub();
        let (entity, event) = (Uuid::new_v4(), Uuid::new_v4());
        // nobody drains this receiver, so the buffer fills up
        let (_handle, rx) = hub.open_session(entity, event, Uuid::new_v4());
        wait_for_count(&hub, entity, event, 1).await;

        for i in 0..(OUTBOUND_QUEUE + 1) {
            hub.broadcast(entity, event, format!("frame-{i}")).await;
        }

        wait_for_count(&hub, entity, event, 0).await;
        // buffered frames drain, then the closed channel surfaces
        let mut drained = 0;
        loop {
            match rx.try_recv() {
                Ok(_) => drained += 1,
                Err(async_channel::TryRecvError::Closed) => break,
                Err(async_channel::TryRecvError::Empty) => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        }
        assert_eq!(drained, OUTBOUND_QUEUE);
    }

    #[tokio::test]
    async fn unregister_closes_the_outbound_buffer_once() {
        let hub = start_hub();
        let (entity, event) = (Uuid::new_v4(), Uuid::new_v4());
        let (handle, rx) = hub.open_session(entity, event, Uuid::new_v4());
        wait_for_count(&hub, entity, event, 1).await;

        hub.unregister(&handle);
        wait_for_count(&hub, entity, event, 0).await;
        assert!(rx.recv().await.is_err());

        // a second unregister of the same session is a no-op
        hub.unregister(&handle);
        assert_eq!(hub.client_count(entity, event), 0);
    }
}
