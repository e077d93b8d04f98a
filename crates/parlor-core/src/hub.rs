//! Shared relay state.
//!
//! [`RelayHub`] is the single object every connection task holds. It wraps
//! the [`RelayDriver`] in a mutex and delivers each event's actions while the
//! lock is held, so broadcasts reach every connection in the same order the
//! registry observed them. Audit export bypasses the driver lock and reads the
//! log under its own read lock.
//!
//! Delivery goes through [`Outbox`], which must not block: the production
//! outbox enqueues onto bounded per-connection queues and drops on overflow.

use parking_lot::Mutex;
use parlor_proto::{
    AuditLogEntry, ClientRequest, OutgoingMessage, ParticipantSummary, PublicKeyReply,
    RegisterRequest, RelayedMessage, ServerMessage,
};

use crate::{
    audit::{AuditLog, ExportToken, LogKey},
    driver::{Registered, RelayAction, RelayConfig, RelayDriver, RelayEvent, export_reply},
    env::Environment,
    error::RelayError,
    registry::ConnectionId,
};

/// Sink for server messages addressed to one connection.
///
/// Called with the relay lock held. Implementations must not block.
pub trait Outbox {
    /// Hand `message` to `conn_id`'s outbound queue.
    fn deliver(&self, conn_id: ConnectionId, message: &ServerMessage);
}

impl<F> Outbox for F
where
    F: Fn(ConnectionId, &ServerMessage),
{
    fn deliver(&self, conn_id: ConnectionId, message: &ServerMessage) {
        self(conn_id, message);
    }
}

/// Thread-safe relay: driver, audit log and export gate.
pub struct RelayHub<E: Environment> {
    driver: Mutex<RelayDriver<E>>,
    audit: AuditLog,
    export_token: ExportToken,
}

impl<E: Environment> RelayHub<E> {
    /// Create a hub whose audit log is sealed under `log_key`.
    pub fn new(env: E, log_key: &LogKey, config: RelayConfig) -> Self {
        let audit = AuditLog::new(log_key);
        let export_token = config.export_token.clone();
        let driver = RelayDriver::new(env, audit.clone(), config);
        Self { driver: Mutex::new(driver), audit, export_token }
    }

    /// Process a transport event and deliver its actions.
    pub fn dispatch<O: Outbox + ?Sized>(&self, event: RelayEvent, outbox: &O) {
        if let RelayEvent::Request { conn_id, request: ClientRequest::ExportAuditLog { token } } =
            &event
        {
            let reply = export_reply(*conn_id, self.export_audit_log(token.as_deref()));
            outbox.deliver(*conn_id, &reply);
            return;
        }

        let mut driver = self.driver.lock();
        let actions = driver.process_event(event);
        deliver(&driver, actions, outbox);
    }

    /// Track a newly opened connection.
    pub fn connect(&self, conn_id: ConnectionId) {
        self.driver.lock().connect(conn_id);
    }

    /// Register an identity on `conn_id`.
    ///
    /// On failure the error is returned and nothing is delivered; reporting
    /// it is up to the caller.
    pub fn register<O: Outbox + ?Sized>(
        &self,
        conn_id: ConnectionId,
        request: RegisterRequest,
        outbox: &O,
    ) -> Result<Registered, RelayError> {
        let mut driver = self.driver.lock();
        let outcome = driver.register(conn_id, request)?;
        deliver(&driver, outcome.actions, outbox);
        Ok(outcome.value)
    }

    /// Relay a message from `conn_id`.
    pub fn send_message<O: Outbox + ?Sized>(
        &self,
        conn_id: ConnectionId,
        candidate: OutgoingMessage,
        outbox: &O,
    ) -> Result<RelayedMessage, RelayError> {
        let mut driver = self.driver.lock();
        let outcome = driver.send_message(conn_id, candidate)?;
        deliver(&driver, outcome.actions, outbox);
        Ok(outcome.value)
    }

    /// Look up a participant's public key.
    pub fn request_public_key(&self, username: Option<&str>) -> PublicKeyReply {
        self.driver.lock().request_public_key(username)
    }

    /// Drop `conn_id`'s identity, keeping the connection.
    pub fn leave<O: Outbox + ?Sized>(&self, conn_id: ConnectionId, outbox: &O) {
        let mut driver = self.driver.lock();
        let actions = driver.leave(conn_id);
        deliver(&driver, actions, outbox);
    }

    /// Drop `conn_id`'s identity and forget the connection.
    pub fn disconnect<O: Outbox + ?Sized>(&self, conn_id: ConnectionId, outbox: &O) {
        let mut driver = self.driver.lock();
        let actions = driver.disconnect(conn_id);
        deliver(&driver, actions, outbox);
    }

    /// Presence snapshot.
    pub fn list_participants(&self) -> Vec<ParticipantSummary> {
        self.driver.lock().list_participants()
    }

    /// Export the encrypted audit log. Does not take the driver lock.
    pub fn export_audit_log(&self, token: Option<&str>) -> Result<Vec<AuditLogEntry>, RelayError> {
        self.export_token.authorize(token)?;
        Ok(self.audit.export_all())
    }

    /// The audit log handle.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Run `f` against the driver under the lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&RelayDriver<E>) -> R) -> R {
        f(&self.driver.lock())
    }
}

fn deliver<E: Environment, O: Outbox + ?Sized>(
    driver: &RelayDriver<E>,
    actions: Vec<RelayAction>,
    outbox: &O,
) {
    for action in actions {
        match action {
            RelayAction::SendTo { conn_id, message } => outbox.deliver(conn_id, &message),
            RelayAction::Broadcast { message, exclude } => {
                for conn_id in driver.connections().filter(|c| Some(*c) != exclude) {
                    outbox.deliver(conn_id, &message);
                }
            },
        }
    }
}
