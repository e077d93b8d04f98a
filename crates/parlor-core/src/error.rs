//! Error types for the relay core.
//!
//! Every [`RelayError`] is recoverable at the boundary: it is reported to the
//! originating connection as a [`RejectionReason`] and never leaves the
//! registry or audit log partially mutated. [`AuditError`] covers the
//! encrypted log and its offline decryption.

use parlor_proto::RejectionReason;
use thiserror::Error;

/// Malformed base64 or key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed base64: {0}")]
pub struct DecodeError(pub String);

impl From<base64::DecodeError> for DecodeError {
    fn from(err: base64::DecodeError) -> Self {
        Self(err.to_string())
    }
}

/// Error classes of the relay taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing required fields
    Validation,
    /// Username collision
    Conflict,
    /// Sender identity not bound to the calling connection
    Unauthenticated,
    /// Recipient set mismatch
    IncompleteEnvelope,
    /// Audit export token mismatch
    Unauthorized,
    /// Malformed base64 or key material
    Decode,
    /// Request would exceed what one frame can carry
    Capacity,
}

/// Errors from registry, relay and export operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Username or public key absent
    #[error("username and public key are required")]
    MissingFields,

    /// Username too short after trimming
    #[error("username must be at least {min} characters")]
    UsernameTooShort {
        /// Minimum length in characters
        min: usize,
    },

    /// Username bound to a different connection
    #[error("username {username:?} is already in use")]
    Conflict {
        /// The contested username
        username: String,
    },

    /// Message without a sender
    #[error("missing sender")]
    MissingSender,

    /// Sender not registered, or registered on another connection
    #[error("sender {sender:?} not registered on this connection")]
    SenderNotRegistered {
        /// The claimed sender
        sender: String,
    },

    /// Envelope set does not cover every registered participant
    #[error("missing envelopes for: {}", missing.join(", "))]
    IncompleteEnvelope {
        /// Missing recipients, sorted
        missing: Vec<String>,
    },

    /// Audit export token mismatch
    #[error("audit export token mismatch")]
    Unauthorized,

    /// Public key is not valid base64
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The relayed message would not fit in one outbound frame
    #[error("relayed message is {size} bytes, frame limit is {max}")]
    MessageTooLarge {
        /// Encoded size of the outbound payload
        size: usize,
        /// Frame payload limit
        max: usize,
    },

    /// The presence snapshot would no longer fit in one outbound frame
    #[error("presence snapshot would be {size} bytes, frame limit is {max}")]
    RosterFull {
        /// Encoded size of the prospective `register_success`
        size: usize,
        /// Frame payload limit
        max: usize,
    },

    /// Request did not decode, or its reply could not be encoded
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

impl RelayError {
    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingFields
            | Self::UsernameTooShort { .. }
            | Self::MalformedRequest(_) => ErrorKind::Validation,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::MissingSender | Self::SenderNotRegistered { .. } => ErrorKind::Unauthenticated,
            Self::IncompleteEnvelope { .. } => ErrorKind::IncompleteEnvelope,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Decode(_) => ErrorKind::Decode,
            Self::MessageTooLarge { .. } | Self::RosterFull { .. } => ErrorKind::Capacity,
        }
    }

    /// Wire-level rejection reported to the originating connection.
    pub fn rejection(&self) -> RejectionReason {
        match self {
            Self::MissingFields => RejectionReason::MissingFields,
            Self::UsernameTooShort { .. } => RejectionReason::UsernameTooShort,
            Self::Conflict { .. } => RejectionReason::UsernameInUse,
            Self::MissingSender => RejectionReason::MissingSender,
            Self::SenderNotRegistered { .. } => RejectionReason::SenderNotRegistered,
            Self::IncompleteEnvelope { missing } => {
                RejectionReason::MissingEnvelopesFor { recipients: missing.clone() }
            },
            Self::Unauthorized => RejectionReason::Unauthorized,
            Self::Decode(_) => RejectionReason::MalformedPublicKey,
            Self::MessageTooLarge { size, max } => {
                RejectionReason::MessageTooLarge { size: *size, max: *max }
            },
            Self::RosterFull { .. } => RejectionReason::RosterFull,
            Self::MalformedRequest(_) => RejectionReason::MalformedRequest,
        }
    }
}

/// Errors from the encrypted audit log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    /// Record could not be serialized
    #[error("failed to serialize audit record: {0}")]
    Serialize(String),

    /// AEAD encryption failed
    #[error("AEAD encryption failed")]
    Encrypt,

    /// Wrong key or tampered entry
    #[error("AEAD authentication failed (wrong key or tampered entry)")]
    Authentication,

    /// Key does not decode to 32 bytes
    #[error("invalid log key length: expected 32 bytes, got {0}")]
    KeyLength(usize),

    /// Nonce does not decode to 12 bytes
    #[error("invalid nonce length: expected 12 bytes, got {0}")]
    NonceLength(usize),

    /// Decrypted plaintext is not an audit record
    #[error("decrypted record is malformed: {0}")]
    Record(String),

    /// Entry or key is not valid base64
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_taxonomy() {
        assert_eq!(RelayError::MissingFields.kind(), ErrorKind::Validation);
        assert_eq!(RelayError::UsernameTooShort { min: 2 }.kind(), ErrorKind::Validation);
        assert_eq!(RelayError::Conflict { username: "a".into() }.kind(), ErrorKind::Conflict);
        assert_eq!(RelayError::MissingSender.kind(), ErrorKind::Unauthenticated);
        assert_eq!(
            RelayError::SenderNotRegistered { sender: "a".into() }.kind(),
            ErrorKind::Unauthenticated
        );
        assert_eq!(
            RelayError::IncompleteEnvelope { missing: vec![] }.kind(),
            ErrorKind::IncompleteEnvelope
        );
        assert_eq!(RelayError::Unauthorized.kind(), ErrorKind::Unauthorized);
        assert_eq!(RelayError::Decode(DecodeError("x".into())).kind(), ErrorKind::Decode);
        assert_eq!(RelayError::MessageTooLarge { size: 2, max: 1 }.kind(), ErrorKind::Capacity);
        assert_eq!(RelayError::RosterFull { size: 2, max: 1 }.kind(), ErrorKind::Capacity);
        assert_eq!(RelayError::MalformedRequest("x".into()).kind(), ErrorKind::Validation);
    }

    #[test]
    fn capacity_errors_map_to_typed_rejections() {
        let err = RelayError::MessageTooLarge { size: 9, max: 8 };
        assert_eq!(err.rejection(), RejectionReason::MessageTooLarge { size: 9, max: 8 });
        assert_eq!(RelayError::RosterFull { size: 9, max: 8 }.rejection(), RejectionReason::RosterFull);
    }

    #[test]
    fn incomplete_envelope_rejection_names_recipients() {
        let err = RelayError::IncompleteEnvelope { missing: vec!["bob".into(), "carol".into()] };
        assert_eq!(err.to_string(), "missing envelopes for: bob, carol");
        assert_eq!(err.rejection().to_string(), "missing-envelopes-for:bob,carol");
    }

    #[test]
    fn conflict_maps_to_username_in_use() {
        let err = RelayError::Conflict { username: "alice".into() };
        assert_eq!(err.rejection(), RejectionReason::UsernameInUse);
    }
}
