//! Structured rejection reasons reported to the originating connection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why the relay refused a request.
///
/// The [`fmt::Display`] form is the stable machine-readable code
/// (`missing-fields`, `missing-envelopes-for:bob,carol`, ...).
/// [`RejectionReason::message`] is the human-readable text shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum RejectionReason {
    /// Username or public key absent
    MissingFields,
    /// Username shorter than the minimum after trimming
    UsernameTooShort,
    /// Username bound to a different connection
    UsernameInUse,
    /// Public key is not valid base64
    MalformedPublicKey,
    /// Message carried no sender
    MissingSender,
    /// Sender is not registered on the calling connection
    SenderNotRegistered,
    /// Message lacks envelopes for these registered participants
    MissingEnvelopesFor {
        /// Missing recipients, sorted
        recipients: Vec<String>,
    },
    /// Audit export token mismatch
    Unauthorized,
    /// The relayed form of the message would not fit in one frame
    MessageTooLarge {
        /// Encoded size in bytes
        size: usize,
        /// Largest payload a frame carries
        max: usize,
    },
    /// Adding this participant would overflow the presence snapshot frame
    RosterFull,
    /// Request frame did not decode
    MalformedRequest,
}

impl RejectionReason {
    /// Human-readable description for display in clients.
    pub fn message(&self) -> String {
        match self {
            Self::MissingFields => "Username and public key are required.".to_string(),
            Self::UsernameTooShort => "Username must be at least 2 characters.".to_string(),
            Self::UsernameInUse => "That username is already in use.".to_string(),
            Self::MalformedPublicKey => "Public key is not valid base64.".to_string(),
            Self::MissingSender => "Missing sender username.".to_string(),
            Self::SenderNotRegistered => "Sender not registered.".to_string(),
            Self::MissingEnvelopesFor { recipients } => {
                format!("Missing envelopes for: {}", recipients.join(", "))
            },
            Self::Unauthorized => "unauthorized".to_string(),
            Self::MessageTooLarge { size, max } => {
                format!("Message is too large to relay ({size} bytes, limit {max}).")
            },
            Self::RosterFull => "The chat is full.".to_string(),
            Self::MalformedRequest => "Request could not be decoded.".to_string(),
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFields => f.write_str("missing-fields"),
            Self::UsernameTooShort => f.write_str("username-too-short"),
            Self::UsernameInUse => f.write_str("username-in-use"),
            Self::MalformedPublicKey => f.write_str("malformed-public-key"),
            Self::MissingSender => f.write_str("missing-sender"),
            Self::SenderNotRegistered => f.write_str("sender-not-registered"),
            Self::MissingEnvelopesFor { recipients } => {
                write!(f, "missing-envelopes-for:{}", recipients.join(","))
            },
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::MessageTooLarge { .. } => f.write_str("message-too-large"),
            Self::RosterFull => f.write_str("roster-full"),
            Self::MalformedRequest => f.write_str("malformed-request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(RejectionReason::MissingFields.to_string(), "missing-fields");
        assert_eq!(RejectionReason::UsernameTooShort.to_string(), "username-too-short");
        assert_eq!(RejectionReason::UsernameInUse.to_string(), "username-in-use");
        assert_eq!(RejectionReason::MissingSender.to_string(), "missing-sender");
        assert_eq!(RejectionReason::SenderNotRegistered.to_string(), "sender-not-registered");
        assert_eq!(RejectionReason::Unauthorized.to_string(), "unauthorized");
        assert_eq!(RejectionReason::RosterFull.to_string(), "roster-full");
        assert_eq!(RejectionReason::MalformedRequest.to_string(), "malformed-request");
        assert_eq!(
            RejectionReason::MessageTooLarge { size: 10, max: 5 }.to_string(),
            "message-too-large"
        );
    }

    #[test]
    fn message_too_large_reports_limit() {
        let reason = RejectionReason::MessageTooLarge { size: 1_048_600, max: 1_048_576 };
        assert_eq!(
            reason.message(),
            "Message is too large to relay (1048600 bytes, limit 1048576)."
        );
    }

    #[test]
    fn missing_envelopes_lists_recipients() {
        let reason = RejectionReason::MissingEnvelopesFor {
            recipients: vec!["bob".to_string(), "carol".to_string()],
        };
        assert_eq!(reason.to_string(), "missing-envelopes-for:bob,carol");
        assert_eq!(reason.message(), "Missing envelopes for: bob, carol");
    }
}
