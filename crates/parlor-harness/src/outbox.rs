//! Outbox that records every delivery.

use parking_lot::Mutex;
use parlor_core::{ConnectionId, Outbox};
use parlor_proto::ServerMessage;

/// Records deliveries in the order the hub made them.
#[derive(Debug, Default)]
pub struct RecordingOutbox {
    deliveries: Mutex<Vec<(ConnectionId, ServerMessage)>>,
}

impl RecordingOutbox {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivery so far.
    pub fn deliveries(&self) -> Vec<(ConnectionId, ServerMessage)> {
        self.deliveries.lock().clone()
    }

    /// Messages delivered to one connection, in order.
    pub fn messages_for(&self, conn_id: ConnectionId) -> Vec<ServerMessage> {
        self.deliveries
            .lock()
            .iter()
            .filter(|(to, _)| *to == conn_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// How many messages named `kind` reached `conn_id`.
    pub fn count(&self, conn_id: ConnectionId, kind: &str) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|(to, message)| *to == conn_id && message.name() == kind)
            .count()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.deliveries.lock().clear();
    }
}

impl Outbox for RecordingOutbox {
    fn deliver(&self, conn_id: ConnectionId, message: &ServerMessage) {
        self.deliveries.lock().push((conn_id, message.clone()));
    }
}
