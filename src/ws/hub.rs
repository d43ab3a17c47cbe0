//! Session registry: the room engine addresses connections by session ID
//! only; the hub owns the outboxes that feed each socket task.

use crate::protocol::ServerMsg;
use crate::types::SessionId;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Bounded per-session send queue. A client that cannot drain this fast
/// enough is disconnected rather than backpressuring the room.
const OUTBOX_CAPACITY: usize = 64;

#[derive(Default)]
pub struct SessionHub {
    sessions: DashMap<SessionId, mpsc::Sender<ServerMsg>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session ID and its outbox receiver. The socket task owns
    /// the receiver; everything else talks to the session through `send`.
    pub fn register(&self) -> (SessionId, mpsc::Receiver<ServerMsg>) {
        let id = ulid::Ulid::new().to_string();
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.sessions.insert(id.clone(), tx);
        (id, rx)
    }

    pub fn unregister(&self, id: &str) {
        self.sessions.remove(id);
    }

    /// Enqueue without blocking. Overflow or a gone receiver drops the
    /// session; its socket task observes the closed channel and exits.
    pub fn send(&self, id: &str, msg: ServerMsg) {
        let Some(tx) = self.sessions.get(id).map(|entry| entry.value().clone()) else {
            return;
        };

        match tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("session {} outbox overflow; disconnecting", id);
                self.sessions.remove(id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.sessions.remove(id);
            }
        }
    }

    /// Drop the session's outbox, ending its socket task.
    pub fn close(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }
}
