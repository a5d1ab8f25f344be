use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::Result;
use crate::model::Message;

/// Events pushed to room subscribers over the change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum RoomEvent {
    Message {
        id: i64,
        room_id: Uuid,
        sender_id: Uuid,
        body: String,
        created_at: i64,
    },
    Receipt {
        room_id: Uuid,
        participant_id: Uuid,
        last_read_message_id: i64,
    },
}

impl RoomEvent {
    pub fn room_id(&self) -> Uuid {
        match self {
            RoomEvent::Message { room_id, .. } | RoomEvent::Receipt { room_id, .. } => *room_id,
        }
    }
}

impl From<&Message> for RoomEvent {
    fn from(m: &Message) -> Self {
        RoomEvent::Message {
            id: m.id,
            room_id: m.room_id,
            sender_id: m.sender_id,
            body: m.body.clone(),
            created_at: m.created_at,
        }
    }
}

struct RoomChannel {
    tx: broadcast::Sender<RoomEvent>,
    /// Serializes store-write + broadcast so subscribers observe events in
    /// store-id order.
    gate: Arc<Mutex<()>>,
}

/// Per-room publish/subscribe registry. Rooms with no subscribers carry no
/// channel; publishing to them is a no-op beyond the store write.
pub struct Fanout {
    capacity: usize,
    rooms: Mutex<HashMap<Uuid, RoomChannel>>,
}

impl Fanout {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    fn channel(&self) -> RoomChannel {
        RoomChannel {
            tx: broadcast::channel(self.capacity).0,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Register for a room's events. The returned handle stops delivery when
    /// dropped or explicitly unsubscribed.
    pub fn subscribe(&self, room_id: Uuid) -> Subscription {
        let mut rooms = self.rooms.lock();
        let ch = rooms.entry(room_id).or_insert_with(|| self.channel());
        Subscription {
            room_id,
            rx: ch.tx.subscribe(),
        }
    }

    /// Run a store write and broadcast its event under the room's order gate.
    ///
    /// Two concurrent senders to the same room are serialized here, so every
    /// subscriber sees the same id-ascending order the store assigned. The
    /// write's failure aborts the publish; a publish with no listeners prunes
    /// the idle channel.
    pub fn publish_with<T, F>(&self, room_id: Uuid, write: F) -> Result<T>
    where
        F: FnOnce() -> Result<(T, Option<RoomEvent>)>,
    {
        let gate = {
            let mut rooms = self.rooms.lock();
            rooms
                .entry(room_id)
                .or_insert_with(|| self.channel())
                .gate
                .clone()
        };
        let _order = gate.lock();
        let (out, event) = write()?;
        if let Some(event) = event {
            let mut rooms = self.rooms.lock();
            if let Some(ch) = rooms.get(&room_id) {
                if ch.tx.receiver_count() > 0 {
                    let _ = ch.tx.send(event);
                } else {
                    rooms.remove(&room_id);
                }
            }
        }
        Ok(out)
    }

    #[cfg(test)]
    fn active_rooms(&self) -> usize {
        self.rooms.lock().len()
    }
}

/// Session-scoped subscription handle, the explicit alternative to ambient
/// "which room am I watching" state.
pub struct Subscription {
    room_id: Uuid,
    rx: broadcast::Receiver<RoomEvent>,
}

impl Subscription {
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub async fn recv(&mut self) -> std::result::Result<RoomEvent, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    /// Stream adapter for select loops.
    pub fn into_stream(self) -> BroadcastStream<RoomEvent> {
        BroadcastStream::new(self.rx)
    }

    /// Deterministic teardown; dropping the handle has the same effect.
    pub fn unsubscribe(self) {}
}
