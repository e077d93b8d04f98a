//! Request and server message payloads.
//!
//! Every frame payload is one of two CBOR-encoded enums: [`ClientRequest`]
//! (client to server) or [`ServerMessage`] (server to client). Both are
//! internally tagged by a `type` field.
//!
//! Opaque blobs (`public_key`, `ciphertext`, `iv`, envelope ciphertexts and
//! the client `timestamp`) are carried as strings. The relay never interprets
//! them beyond base64-decoding `public_key` for fingerprinting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Frame, FrameKind, RejectionReason, errors::Result};

/// One participant in a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    /// Registered username
    pub username: String,
    /// Colon-grouped hex fingerprint of the public key
    pub fingerprint: String,
    /// Base64 public key as supplied at registration
    pub public_key: String,
}

/// Registration request.
///
/// Fields are optional on the wire so that missing fields surface as a
/// `missing-fields` rejection rather than a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Requested username (trimmed by the relay)
    #[serde(default)]
    pub username: Option<String>,
    /// Base64 public key blob
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Candidate message as submitted by a sender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Claimed sender username
    #[serde(rename = "from", default)]
    pub sender: Option<String>,
    /// Sender's own copy of the ciphertext
    #[serde(default)]
    pub ciphertext: Option<String>,
    /// Initialization vector for the payload cipher
    #[serde(default)]
    pub iv: Option<String>,
    /// Client-supplied timestamp, passed through verbatim
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Recipient username to per-recipient ciphertext. Absent means empty.
    #[serde(default)]
    pub envelopes: Option<BTreeMap<String, String>>,
}

/// A validated message as broadcast to every connection and stored in the
/// audit log.
///
/// `envelopes` is a `BTreeMap` so that serialization is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    /// Sender username, bound to the sending connection
    #[serde(rename = "from")]
    pub sender: String,
    /// Sender's own copy of the ciphertext
    pub ciphertext: Option<String>,
    /// Initialization vector for the payload cipher
    pub iv: Option<String>,
    /// Client-supplied timestamp
    pub timestamp: Option<String>,
    /// Recipient username to per-recipient ciphertext
    pub envelopes: BTreeMap<String, String>,
}

/// Reply to a public key lookup. All fields are `None` for unknown users,
/// and `username` is `None` when the request named nobody.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyReply {
    /// Username that was looked up
    pub username: Option<String>,
    /// Base64 public key, if registered
    pub public_key: Option<String>,
    /// Fingerprint, if registered
    pub fingerprint: Option<String>,
}

/// One encrypted audit log record, as exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Base64 96-bit AEAD nonce
    pub nonce: String,
    /// Base64 AEAD ciphertext (including tag)
    pub ciphertext: String,
}

/// Client to server requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Register (or re-register) an identity on this connection
    Register(RegisterRequest),
    /// Relay a message carrying one envelope per participant
    SendMessage(OutgoingMessage),
    /// Look up a participant's public key
    RequestPublicKey {
        /// Username to look up
        #[serde(default)]
        username: Option<String>,
    },
    /// Leave the chat without disconnecting
    LeaveChat,
    /// Read-only presence snapshot
    ListParticipants,
    /// Export the encrypted audit log
    ExportAuditLog {
        /// Shared-secret export token
        #[serde(default)]
        token: Option<String>,
    },
    /// Health probe
    Ping,
}

/// Server to client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted
    RegisterSuccess {
        /// Registered username
        username: String,
        /// Fingerprint of the registered key
        fingerprint: String,
        /// Presence snapshot including the new participant
        participants: Vec<ParticipantSummary>,
    },
    /// Registration refused
    RegisterError {
        /// Machine-readable reason
        reason: RejectionReason,
        /// Human-readable text
        message: String,
    },
    /// Presence snapshot
    Participants {
        /// Participants ordered by case-insensitive username
        participants: Vec<ParticipantSummary>,
    },
    /// A participant joined
    UserJoined {
        /// Username that joined
        username: String,
        /// Its fingerprint
        fingerprint: String,
    },
    /// A participant left
    UserLeft {
        /// Username that left
        username: String,
        /// Its fingerprint
        fingerprint: String,
    },
    /// A relayed message
    ReceiveMessage(RelayedMessage),
    /// Message refused
    DeliveryError {
        /// Machine-readable reason
        reason: RejectionReason,
        /// Human-readable text
        message: String,
    },
    /// Public key lookup result
    PublicKey(PublicKeyReply),
    /// Encrypted audit log export
    AuditLog {
        /// Entries in relay order
        entries: Vec<AuditLogEntry>,
    },
    /// Audit export refused
    ExportError {
        /// Machine-readable reason
        reason: RejectionReason,
        /// Human-readable text
        message: String,
    },
    /// Request frame could not be decoded
    RequestError {
        /// Machine-readable reason
        reason: RejectionReason,
        /// Human-readable text
        message: String,
    },
    /// Health probe reply
    Pong,
}

impl ClientRequest {
    /// Wrap this request in a frame.
    pub fn to_frame(&self) -> Result<Frame> {
        Frame::from_payload(FrameKind::Request, self)
    }

    /// Decode a request frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        frame.to_payload(FrameKind::Request)
    }
}

impl ServerMessage {
    /// Wrap this message in a frame.
    pub fn to_frame(&self) -> Result<Frame> {
        Frame::from_payload(FrameKind::Server, self)
    }

    /// Decode a server message frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        frame.to_payload(FrameKind::Server)
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterSuccess { .. } => "register_success",
            Self::RegisterError { .. } => "register_error",
            Self::Participants { .. } => "participants",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::ReceiveMessage(_) => "receive_message",
            Self::DeliveryError { .. } => "delivery_error",
            Self::PublicKey(_) => "public_key",
            Self::AuditLog { .. } => "audit_log",
            Self::ExportError { .. } => "export_error",
            Self::RequestError { .. } => "request_error",
            Self::Pong => "pong",
        }
    }
}
