//! Per-connection outbound queues.
//!
//! Each open connection owns a bounded queue drained by its writer task.
//! [`ConnectionTable`] is the relay's [`Outbox`]: it encodes a message once
//! per recipient and enqueues without waiting. A full queue drops the frame
//! for that recipient only, so one slow reader never stalls the relay lock.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;
use parlor_core::{ConnectionId, Outbox};
use parlor_proto::ServerMessage;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Outbound queues keyed by connection.
pub struct ConnectionTable {
    queues: RwLock<HashMap<ConnectionId, mpsc::Sender<Bytes>>>,
    capacity: usize,
}

impl ConnectionTable {
    /// Create a table whose queues hold `capacity` frames each.
    pub fn new(capacity: usize) -> Self {
        Self { queues: RwLock::new(HashMap::new()), capacity: capacity.max(1) }
    }

    /// Open a queue for `conn_id` and return its receiving end.
    pub fn open(&self, conn_id: ConnectionId) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.queues.write().insert(conn_id, tx).is_some() {
            tracing::warn!(conn_id, "replaced an existing outbound queue");
        }
        rx
    }

    /// Drop the queue for `conn_id`. Its writer drains what is left and exits.
    pub fn close(&self, conn_id: ConnectionId) {
        self.queues.write().remove(&conn_id);
    }

    /// Number of open queues.
    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    /// Whether no queue is open.
    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }
}

impl Outbox for ConnectionTable {
    fn deliver(&self, conn_id: ConnectionId, message: &ServerMessage) {
        let Some(tx) = self.queues.read().get(&conn_id).cloned() else {
            tracing::debug!(conn_id, kind = message.name(), "no queue for connection");
            return;
        };

        let bytes = match message.to_frame().and_then(|frame| frame.to_vec()) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::error!(conn_id, kind = message.name(), "failed to encode: {}", e);
                return;
            },
        };

        match tx.try_send(bytes) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                tracing::warn!(conn_id, kind = message.name(), "outbound queue full, dropping");
            },
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(conn_id, kind = message.name(), "outbound queue closed");
            },
        }
    }
}
