//! Relay Driver
//!
//! Sans-IO orchestrator for the relay. Consumes [`RelayEvent`]s from the
//! transport and returns [`RelayAction`]s for the caller to deliver.
//!
//! ## Responsibilities
//!
//! - Connection tracking: the set of open connections broadcasts fan out to
//! - Registration: validate, evict, install, announce
//! - Relay: validate envelope coverage, broadcast, append to the audit log
//! - Rejections: every failed or undecodable request is answered on the
//!   originating connection only
//!
//! Every outbound message must fit in one frame. Registrations that would
//! push the presence snapshot past the frame limit, and messages whose
//! relayed form would, are rejected before anything is committed.
//!
//! The driver holds no locks and performs no I/O. [`crate::RelayHub`] wraps
//! it in a mutex so that each event's registry mutation and the delivery of
//! its actions happen as one step.

use std::collections::BTreeSet;

use parlor_proto::{
    AuditLogEntry, ClientRequest, OutgoingMessage, ParticipantSummary, ProtocolError,
    PublicKeyReply, RegisterRequest, RelayedMessage, ServerMessage,
};

use crate::{
    audit::{AuditLog, ExportToken},
    env::Environment,
    error::RelayError,
    fingerprint::Fingerprint,
    presence,
    registry::{ConnectionId, ParticipantRegistry},
    relay,
};

/// Relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Gate on audit export
    pub export_token: ExportToken,
}

/// Events the transport feeds into the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A connection was accepted
    ConnectionOpened {
        /// New connection
        conn_id: ConnectionId,
    },
    /// A connection closed, cleanly or not
    ConnectionClosed {
        /// Closed connection
        conn_id: ConnectionId,
    },
    /// A decoded request arrived
    Request {
        /// Originating connection
        conn_id: ConnectionId,
        /// The request
        request: ClientRequest,
    },
    /// A request frame arrived that did not decode
    MalformedRequest {
        /// Originating connection
        conn_id: ConnectionId,
        /// Decoder error, for logging
        detail: String,
    },
}

/// Deliveries produced by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Deliver to one connection
    SendTo {
        /// Recipient
        conn_id: ConnectionId,
        /// Message to deliver
        message: ServerMessage,
    },
    /// Deliver to every open connection, optionally skipping one
    Broadcast {
        /// Message to deliver
        message: ServerMessage,
        /// Connection to skip
        exclude: Option<ConnectionId>,
    },
}

/// A successful typed operation: its result plus the deliveries it caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    /// Operation result
    pub value: T,
    /// Deliveries, in order
    pub actions: Vec<RelayAction>,
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    /// Installed username
    pub username: String,
    /// Fingerprint of the registered key
    pub fingerprint: Fingerprint,
    /// Snapshot including the new participant
    pub participants: Vec<ParticipantSummary>,
}

/// Sans-IO relay state machine.
pub struct RelayDriver<E: Environment> {
    env: E,
    registry: ParticipantRegistry,
    connections: BTreeSet<ConnectionId>,
    audit: AuditLog,
    export_token: ExportToken,
}

impl<E: Environment> RelayDriver<E> {
    /// Create a driver appending to `audit`.
    pub fn new(env: E, audit: AuditLog, config: RelayConfig) -> Self {
        Self {
            env,
            registry: ParticipantRegistry::new(),
            connections: BTreeSet::new(),
            audit,
            export_token: config.export_token,
        }
    }

    /// Process one event.
    ///
    /// Never fails: rejected requests produce a rejection addressed to the
    /// originating connection.
    pub fn process_event(&mut self, event: RelayEvent) -> Vec<RelayAction> {
        match event {
            RelayEvent::ConnectionOpened { conn_id } => {
                self.connect(conn_id);
                Vec::new()
            },
            RelayEvent::ConnectionClosed { conn_id } => self.disconnect(conn_id),
            RelayEvent::Request { conn_id, request } => self.handle_request(conn_id, request),
            RelayEvent::MalformedRequest { conn_id, detail } => {
                self.reject_malformed(conn_id, detail)
            },
        }
    }

    fn reject_malformed(&self, conn_id: ConnectionId, detail: String) -> Vec<RelayAction> {
        if !self.connections.contains(&conn_id) {
            return Vec::new();
        }

        let err = RelayError::MalformedRequest(detail);
        tracing::warn!(conn_id, %err, "request rejected");
        let reason = err.rejection();
        reply(conn_id, ServerMessage::RequestError { message: reason.message(), reason })
    }

    fn handle_request(&mut self, conn_id: ConnectionId, request: ClientRequest) -> Vec<RelayAction> {
        // A stream task may still deliver a request after its connection
        // closed. Acting on it would bind an identity nobody can reach.
        if !self.connections.contains(&conn_id) {
            tracing::debug!(conn_id, "request from closed connection ignored");
            return Vec::new();
        }

        match request {
            ClientRequest::Register(request) => match self.register(conn_id, request) {
                Ok(outcome) => outcome.actions,
                Err(err) => {
                    tracing::warn!(conn_id, %err, "registration rejected");
                    let reason = err.rejection();
                    reply(conn_id, ServerMessage::RegisterError { message: reason.message(), reason })
                },
            },
            ClientRequest::SendMessage(candidate) => match self.send_message(conn_id, candidate) {
                Ok(outcome) => outcome.actions,
                Err(err) => {
                    tracing::warn!(conn_id, %err, "message rejected");
                    let reason = err.rejection();
                    reply(conn_id, ServerMessage::DeliveryError { message: reason.message(), reason })
                },
            },
            ClientRequest::RequestPublicKey { username } => {
                reply(conn_id, ServerMessage::PublicKey(self.request_public_key(username.as_deref())))
            },
            ClientRequest::LeaveChat => self.leave(conn_id),
            ClientRequest::ListParticipants => {
                reply(conn_id, ServerMessage::Participants { participants: self.list_participants() })
            },
            ClientRequest::ExportAuditLog { token } => {
                reply(conn_id, export_reply(conn_id, self.export_audit_log(token.as_deref())))
            },
            ClientRequest::Ping => reply(conn_id, ServerMessage::Pong),
        }
    }

    /// Track a newly opened connection.
    pub fn connect(&mut self, conn_id: ConnectionId) {
        if self.connections.insert(conn_id) {
            tracing::debug!(conn_id, "connection opened");
        }
    }

    /// Register (or re-register) an identity on `conn_id`.
    ///
    /// On success, deliveries are: departure of the connection's previous
    /// identity (if any), `register_success` to the caller, `user_joined` to
    /// everyone else, then the snapshot to everyone. On failure nothing
    /// changes.
    ///
    /// Fails with [`RelayError::RosterFull`] if the resulting
    /// `register_success` would not fit in one frame. The snapshot is
    /// strictly smaller, so every later `participants` frame fits too.
    pub fn register(
        &mut self,
        conn_id: ConnectionId,
        request: RegisterRequest,
    ) -> Result<Outcome<Registered>, RelayError> {
        let pending = self.registry.prepare(
            conn_id,
            request.username.as_deref(),
            request.public_key.as_deref(),
        )?;

        let preview = ServerMessage::RegisterSuccess {
            username: pending.username().to_string(),
            fingerprint: pending.fingerprint().to_string(),
            participants: self.registry.snapshot_with(&pending),
        };
        ensure_fits(&preview).map_err(|err| match err {
            RelayError::MessageTooLarge { size, max } => RelayError::RosterFull { size, max },
            other => other,
        })?;
        self.connections.insert(conn_id);

        let mut actions = Vec::new();
        if let Some(evicted) = self.registry.remove(conn_id) {
            tracing::info!(conn_id, username = %evicted.username, "participant re-registering");
            actions.extend(presence::departure(&evicted, self.registry.snapshot()));
        }

        // prepare() checked availability and nothing else has touched the
        // registry since, so install cannot conflict here.
        let record = self.registry.install(pending, self.env.now())?;
        tracing::info!(
            conn_id,
            username = %record.username,
            fingerprint = %record.fingerprint,
            "participant joined"
        );

        let participants = self.registry.snapshot();
        actions.push(RelayAction::SendTo {
            conn_id,
            message: ServerMessage::RegisterSuccess {
                username: record.username.clone(),
                fingerprint: record.fingerprint.to_string(),
                participants: participants.clone(),
            },
        });
        actions.extend(presence::arrival(&record, participants.clone()));

        Ok(Outcome {
            value: Registered {
                username: record.username,
                fingerprint: record.fingerprint,
                participants,
            },
            actions,
        })
    }

    /// Validate and relay a message from `conn_id`.
    ///
    /// A valid message is broadcast to every connection and appended to the
    /// audit log. A message whose `receive_message` frame would exceed the
    /// payload limit is rejected before either happens. An append failure is
    /// logged, counted by [`AuditLog::failed_appends`] and does not block
    /// delivery.
    pub fn send_message(
        &mut self,
        conn_id: ConnectionId,
        candidate: OutgoingMessage,
    ) -> Result<Outcome<RelayedMessage>, RelayError> {
        let relayed = relay::validate(&self.registry, conn_id, candidate)?;

        let message = ServerMessage::ReceiveMessage(relayed.clone());
        ensure_fits(&message)?;
        let actions = vec![RelayAction::Broadcast { message, exclude: None }];

        match self.audit.append(&self.env, &relayed) {
            Ok(index) => tracing::debug!(index, sender = %relayed.sender, "audit entry appended"),
            Err(err) => {
                tracing::error!(sender = %relayed.sender, %err, "failed to append audit entry");
            },
        }

        tracing::info!(
            sender = %relayed.sender,
            envelopes = relayed.envelopes.len(),
            "message relayed"
        );
        Ok(Outcome { value: relayed, actions })
    }

    /// Look up a participant's public key.
    ///
    /// No username yields an all-`None` reply; an unknown username yields
    /// the username with `None` key and fingerprint.
    pub fn request_public_key(&self, username: Option<&str>) -> PublicKeyReply {
        let Some(username) = username.filter(|u| !u.is_empty()) else {
            return PublicKeyReply::default();
        };

        let record = self.registry.lookup(username);
        PublicKeyReply {
            username: Some(username.to_string()),
            public_key: record.map(|r| r.public_key.clone()),
            fingerprint: record.map(|r| r.fingerprint.to_string()),
        }
    }

    /// Drop the identity bound to `conn_id`, keeping the connection open.
    ///
    /// Idempotent: an unregistered connection produces no deliveries.
    pub fn leave(&mut self, conn_id: ConnectionId) -> Vec<RelayAction> {
        match self.registry.remove(conn_id) {
            Some(record) => {
                tracing::info!(conn_id, username = %record.username, "participant left");
                presence::departure(&record, self.registry.snapshot()).into()
            },
            None => Vec::new(),
        }
    }

    /// Leave, then forget the connection.
    pub fn disconnect(&mut self, conn_id: ConnectionId) -> Vec<RelayAction> {
        let actions = self.leave(conn_id);
        if self.connections.remove(&conn_id) {
            tracing::debug!(conn_id, "connection closed");
        }
        actions
    }

    /// Presence snapshot.
    pub fn list_participants(&self) -> Vec<ParticipantSummary> {
        self.registry.snapshot()
    }

    /// Export the audit log if `token` is accepted.
    pub fn export_audit_log(&self, token: Option<&str>) -> Result<Vec<AuditLogEntry>, RelayError> {
        self.export_token.authorize(token)?;
        Ok(self.audit.export_all())
    }

    /// The registry.
    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    /// Open connections, ascending.
    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.iter().copied()
    }

    /// Whether `conn_id` is open.
    pub fn is_connected(&self, conn_id: ConnectionId) -> bool {
        self.connections.contains(&conn_id)
    }

    /// The audit log handle.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Verify registry consistency and that every bound connection is open.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.registry.check_invariants()?;
        for summary in self.registry.snapshot() {
            let Some(record) = self.registry.lookup(&summary.username) else {
                return Err(format!("snapshot lists unknown {:?}", summary.username));
            };
            if !self.connections.contains(&record.connection_id) {
                return Err(format!(
                    "{:?} bound to closed connection {}",
                    record.username, record.connection_id
                ));
            }
        }
        Ok(())
    }
}

/// Reply to an export request.
pub(crate) fn export_reply(
    conn_id: ConnectionId,
    result: Result<Vec<AuditLogEntry>, RelayError>,
) -> ServerMessage {
    let count = result.as_ref().map_or(0, Vec::len);
    let result = result.and_then(|entries| {
        let message = ServerMessage::AuditLog { entries };
        ensure_fits(&message)?;
        Ok(message)
    });

    match result {
        Ok(message) => {
            tracing::info!(conn_id, entries = count, "audit log exported");
            message
        },
        Err(err) => {
            tracing::warn!(conn_id, %err, "audit export refused");
            let reason = err.rejection();
            ServerMessage::ExportError { message: reason.message(), reason }
        },
    }
}

/// Check that `message` encodes into a single frame.
fn ensure_fits(message: &ServerMessage) -> Result<(), RelayError> {
    match message.to_frame() {
        Ok(_) => Ok(()),
        Err(ProtocolError::PayloadTooLarge { size, max }) => {
            Err(RelayError::MessageTooLarge { size, max })
        },
        Err(err) => Err(RelayError::MalformedRequest(err.to_string())),
    }
}

fn reply(conn_id: ConnectionId, message: ServerMessage) -> Vec<RelayAction> {
    vec![RelayAction::SendTo { conn_id, message }]
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
        time::Instant,
    };

    use parlor_proto::{FrameHeader, RejectionReason};
    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::audit::{LogKey, decrypt_entries};

    #[derive(Clone)]
    struct TestEnv {
        rng: Arc<Mutex<ChaCha20Rng>>,
    }

    impl Environment for TestEnv {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn unix_time_secs(&self) -> i64 {
            1_700_000_000
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().unwrap().fill_bytes(buffer);
        }
    }

    fn driver(token: Option<&str>) -> (RelayDriver<TestEnv>, LogKey) {
        let env = TestEnv { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(42))) };
        let key = LogKey::generate(&env);
        let config = RelayConfig { export_token: ExportToken::new(token) };
        (RelayDriver::new(env, AuditLog::new(&key), config), key)
    }

    fn register_request(username: &str) -> ClientRequest {
        ClientRequest::Register(RegisterRequest {
            username: Some(username.to_string()),
            public_key: Some("a2V5".to_string()),
        })
    }

    fn send_request(sender: &str, recipients: &[&str]) -> ClientRequest {
        ClientRequest::SendMessage(OutgoingMessage {
            sender: Some(sender.to_string()),
            ciphertext: Some("Y3Q=".to_string()),
            iv: Some("aXY=".to_string()),
            timestamp: None,
            envelopes: Some(
                recipients.iter().map(|r| (r.to_string(), "ZQ==".to_string())).collect::<BTreeMap<_, _>>(),
            ),
        })
    }

    fn request(driver: &mut RelayDriver<TestEnv>, conn_id: u64, request: ClientRequest) -> Vec<RelayAction> {
        driver.connect(conn_id);
        driver.process_event(RelayEvent::Request { conn_id, request })
    }

    #[test]
    fn register_emits_success_then_presence() {
        let (mut driver, _) = driver(None);
        driver.process_event(RelayEvent::ConnectionOpened { conn_id: 1 });

        let actions = request(&mut driver, 1, register_request("alice"));

        assert_eq!(actions.len(), 3);
        assert!(matches!(
            &actions[0],
            RelayAction::SendTo { conn_id: 1, message: ServerMessage::RegisterSuccess { username, .. } }
                if username == "alice"
        ));
        assert!(matches!(
            &actions[1],
            RelayAction::Broadcast { message: ServerMessage::UserJoined { .. }, exclude: Some(1) }
        ));
        assert!(matches!(
            &actions[2],
            RelayAction::Broadcast { message: ServerMessage::Participants { .. }, exclude: None }
        ));
        driver.check_invariants().unwrap();
    }

    #[test]
    fn reregister_announces_departure_first() {
        let (mut driver, _) = driver(None);
        request(&mut driver, 1, register_request("alice"));

        let actions = request(&mut driver, 1, register_request("alicia"));

        assert_eq!(actions.len(), 5);
        assert!(matches!(
            &actions[0],
            RelayAction::Broadcast { message: ServerMessage::UserLeft { username, .. }, exclude: Some(1) }
                if username == "alice"
        ));
        assert!(matches!(
            &actions[1],
            RelayAction::Broadcast { message: ServerMessage::Participants { participants }, .. }
                if participants.is_empty()
        ));
        assert!(matches!(&actions[2], RelayAction::SendTo { message: ServerMessage::RegisterSuccess { .. }, .. }));
    }

    #[test]
    fn rejected_registration_replies_only_to_caller() {
        let (mut driver, _) = driver(None);
        request(&mut driver, 1, register_request("alice"));

        let actions = request(&mut driver, 2, register_request("alice"));
        assert_eq!(
            actions,
            vec![RelayAction::SendTo {
                conn_id: 2,
                message: ServerMessage::RegisterError {
                    reason: RejectionReason::UsernameInUse,
                    message: "That username is already in use.".to_string(),
                },
            }]
        );
    }

    #[test]
    fn relay_broadcasts_and_appends() {
        let (mut driver, key) = driver(None);
        request(&mut driver, 1, register_request("alice"));
        request(&mut driver, 2, register_request("bob"));

        let actions = request(&mut driver, 1, send_request("alice", &["alice", "bob"]));
        assert!(matches!(
            &actions[..],
            [RelayAction::Broadcast { message: ServerMessage::ReceiveMessage(m), exclude: None }]
                if m.sender == "alice"
        ));

        let records = decrypt_entries(&key, &driver.audit().export_all()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message.envelopes.len(), 2);
    }

    #[test]
    fn incomplete_message_not_logged() {
        let (mut driver, _) = driver(None);
        request(&mut driver, 1, register_request("alice"));
        request(&mut driver, 2, register_request("bob"));

        let actions = request(&mut driver, 1, send_request("alice", &["alice"]));
        assert!(matches!(
            &actions[..],
            [RelayAction::SendTo {
                conn_id: 1,
                message: ServerMessage::DeliveryError {
                    reason: RejectionReason::MissingEnvelopesFor { recipients },
                    ..
                },
            }] if recipients == &["bob".to_string()]
        ));
        assert!(driver.audit().is_empty());
    }

    #[test]
    fn public_key_lookup() {
        let (mut driver, _) = driver(None);
        request(&mut driver, 1, register_request("alice"));

        let found = driver.request_public_key(Some("alice"));
        assert_eq!(found.public_key.as_deref(), Some("a2V5"));
        assert!(found.fingerprint.is_some());

        let unknown = driver.request_public_key(Some("zed"));
        assert_eq!(unknown.username.as_deref(), Some("zed"));
        assert!(unknown.public_key.is_none());

        assert_eq!(driver.request_public_key(None), PublicKeyReply::default());
    }

    #[test]
    fn leave_is_idempotent() {
        let (mut driver, _) = driver(None);
        request(&mut driver, 1, register_request("alice"));

        assert_eq!(request(&mut driver, 1, ClientRequest::LeaveChat).len(), 2);
        assert!(request(&mut driver, 1, ClientRequest::LeaveChat).is_empty());
        assert!(driver.is_connected(1));
    }

    #[test]
    fn disconnect_removes_identity_and_connection() {
        let (mut driver, _) = driver(None);
        request(&mut driver, 1, register_request("alice"));
        request(&mut driver, 2, register_request("bob"));

        let actions = driver.process_event(RelayEvent::ConnectionClosed { conn_id: 1 });
        assert_eq!(actions.len(), 2);
        assert!(!driver.is_connected(1));
        assert!(driver.registry().lookup("alice").is_none());
        driver.check_invariants().unwrap();
    }

    #[test]
    fn export_requires_token() {
        let (mut driver, _) = driver(Some("letmein"));

        let denied = request(&mut driver, 1, ClientRequest::ExportAuditLog { token: None });
        assert!(matches!(
            &denied[..],
            [RelayAction::SendTo { message: ServerMessage::ExportError { reason: RejectionReason::Unauthorized, .. }, .. }]
        ));

        let allowed = request(
            &mut driver,
            1,
            ClientRequest::ExportAuditLog { token: Some("letmein".to_string()) },
        );
        assert!(matches!(
            &allowed[..],
            [RelayAction::SendTo { message: ServerMessage::AuditLog { entries }, .. }] if entries.is_empty()
        ));
    }

    #[test]
    fn closed_connection_requests_are_ignored() {
        let (mut driver, _) = driver(None);
        driver.process_event(RelayEvent::ConnectionOpened { conn_id: 1 });
        driver.process_event(RelayEvent::ConnectionClosed { conn_id: 1 });

        let actions =
            driver.process_event(RelayEvent::Request { conn_id: 1, request: register_request("alice") });
        assert!(actions.is_empty());
        assert!(driver.registry().is_empty());
        assert!(!driver.is_connected(1));
    }

    #[test]
    fn ping_pongs() {
        let (mut driver, _) = driver(None);
        assert_eq!(
            request(&mut driver, 3, ClientRequest::Ping),
            vec![RelayAction::SendTo { conn_id: 3, message: ServerMessage::Pong }]
        );
    }

    const MAX: usize = FrameHeader::MAX_PAYLOAD_SIZE as usize;

    fn outgoing(ciphertext_len: usize) -> OutgoingMessage {
        OutgoingMessage {
            sender: Some("alice".to_string()),
            ciphertext: Some("A".repeat(ciphertext_len)),
            iv: Some("aXY=".to_string()),
            timestamp: None,
            envelopes: Some([("alice".to_string(), "ZQ==".to_string())].into()),
        }
    }

    /// Ciphertext length whose `receive_message` payload is exactly `MAX`.
    fn ciphertext_len_at_limit() -> usize {
        // Long enough that CBOR uses the same 5-byte string header at the limit
        let base = 1 << 16;
        let candidate = outgoing(base);
        let relayed = RelayedMessage {
            sender: "alice".to_string(),
            ciphertext: candidate.ciphertext,
            iv: candidate.iv,
            timestamp: None,
            envelopes: candidate.envelopes.unwrap_or_default(),
        };
        let encoded = ServerMessage::ReceiveMessage(relayed).to_frame().unwrap().payload.len();
        base + MAX - encoded
    }

    #[test]
    fn message_at_frame_limit_is_relayed() {
        let (mut driver, _) = driver(None);
        request(&mut driver, 1, register_request("alice"));

        let outcome = driver.send_message(1, outgoing(ciphertext_len_at_limit())).unwrap();
        let [RelayAction::Broadcast { message, .. }] = &outcome.actions[..] else {
            panic!("expected one broadcast, got {:?}", outcome.actions.len());
        };
        assert_eq!(message.to_frame().unwrap().payload.len(), MAX);
        assert_eq!(driver.audit().len(), 1);
    }

    #[test]
    fn message_over_frame_limit_is_rejected_before_audit() {
        let (mut driver, _) = driver(None);
        request(&mut driver, 1, register_request("alice"));

        // The request itself still fits, only the relayed form does not
        let candidate = outgoing(ciphertext_len_at_limit() + 1);
        assert!(ClientRequest::SendMessage(candidate.clone()).to_frame().is_ok());

        let actions = request(&mut driver, 1, ClientRequest::SendMessage(candidate));
        assert_eq!(
            actions,
            vec![RelayAction::SendTo {
                conn_id: 1,
                message: ServerMessage::DeliveryError {
                    reason: RejectionReason::MessageTooLarge { size: MAX + 1, max: MAX },
                    message: RejectionReason::MessageTooLarge { size: MAX + 1, max: MAX }.message(),
                },
            }]
        );
        assert!(driver.audit().is_empty());
        assert_eq!(driver.audit().failed_appends(), 0);
    }

    fn bulky_register(username: &str) -> RegisterRequest {
        // 64 KiB of valid base64 keeps the roster small enough to fill quickly
        RegisterRequest { username: Some(username.to_string()), public_key: Some("A".repeat(1 << 16)) }
    }

    #[test]
    fn registration_that_would_overflow_snapshot_is_refused() {
        let (mut driver, _) = driver(None);

        let mut conn_id = 0;
        let err = loop {
            conn_id += 1;
            driver.connect(conn_id);
            if let Err(err) = driver.register(conn_id, bulky_register(&format!("user{conn_id:02}"))) {
                break err;
            }
            assert!(conn_id < 32, "roster never filled");
        };

        assert!(matches!(err, RelayError::RosterFull { size, max } if size > max && max == MAX));
        assert_eq!(driver.registry().len(), (conn_id - 1) as usize);
        assert!(driver.registry().binding(conn_id).is_none());
        driver.check_invariants().unwrap();

        // Everything the relay can still send about presence fits
        let snapshot = ServerMessage::Participants { participants: driver.list_participants() };
        assert!(snapshot.to_frame().is_ok());

        let refused = driver.process_event(RelayEvent::Request {
            conn_id,
            request: ClientRequest::Register(bulky_register("late")),
        });
        assert!(matches!(
            &refused[..],
            [RelayAction::SendTo { message: ServerMessage::RegisterError { reason: RejectionReason::RosterFull, .. }, .. }]
        ));

        // Room frees up once someone leaves
        driver.leave(1);
        driver.register(conn_id, bulky_register("late")).unwrap();
        driver.check_invariants().unwrap();
    }

    #[test]
    fn oversized_export_is_refused_not_dropped() {
        let entries = vec![AuditLogEntry { nonce: "bm9uY2U=".to_string(), ciphertext: "A".repeat(MAX) }];
        let reply = export_reply(4, Ok(entries));
        assert!(matches!(
            reply,
            ServerMessage::ExportError { reason: RejectionReason::MessageTooLarge { max: MAX, .. }, .. }
        ));
    }

    #[test]
    fn malformed_request_is_answered() {
        let (mut driver, _) = driver(None);
        driver.process_event(RelayEvent::ConnectionOpened { conn_id: 2 });

        let actions = driver.process_event(RelayEvent::MalformedRequest {
            conn_id: 2,
            detail: "invalid type: integer, expected a string".to_string(),
        });
        assert_eq!(
            actions,
            vec![RelayAction::SendTo {
                conn_id: 2,
                message: ServerMessage::RequestError {
                    reason: RejectionReason::MalformedRequest,
                    message: "Request could not be decoded.".to_string(),
                },
            }]
        );

        driver.process_event(RelayEvent::ConnectionClosed { conn_id: 2 });
        let late = driver
            .process_event(RelayEvent::MalformedRequest { conn_id: 2, detail: String::new() });
        assert!(late.is_empty());
    }
}
