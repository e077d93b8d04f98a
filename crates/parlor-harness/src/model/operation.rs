//! Operations for model-based testing.
//!
//! Operations are generated randomly and applied to both the model and the
//! real hub. Names and keys are drawn from small pools so that conflicts,
//! re-registrations and validation failures come up often.

use std::collections::BTreeSet;

use arbitrary::Arbitrary;

/// Client identifier (0-indexed).
pub type ClientId = u8;

/// Usernames operations pick from.
///
/// Includes a case variant of `alice`, a one-character name and a name that
/// trims to nothing.
pub const NAME_POOL: [&str; 7] = ["alice", "bob", "carol", "Alice", " dave ", "x", "   "];

/// Public key used for a key selector. Every sixteenth selector yields a
/// string that is not base64.
pub fn public_key_for(key: u8) -> String {
    if key % 16 == 0 {
        return "not base64!".to_string();
    }
    let alphabet = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let symbol = char::from(alphabet[usize::from(key) % alphabet.len()]);
    // 8 symbols decode to 6 bytes without padding
    symbol.to_string().repeat(8)
}

/// Operations that can be applied to the system.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Open the client's connection. No-op if already open.
    Connect {
        /// Client connecting
        client_id: ClientId,
    },

    /// Close the client's connection.
    Disconnect {
        /// Client disconnecting
        client_id: ClientId,
    },

    /// Register a name from [`NAME_POOL`].
    Register {
        /// Client registering
        client_id: ClientId,
        /// Index into [`NAME_POOL`], taken modulo its length
        name: u8,
        /// Key selector, see [`public_key_for`]
        key: u8,
    },

    /// Send a message.
    SendMessage {
        /// Client sending
        client_id: ClientId,
        /// Who the message claims to be from
        sender: SenderChoice,
        /// Which envelopes are attached
        coverage: Coverage,
    },

    /// Drop the client's identity but keep the connection.
    Leave {
        /// Client leaving
        client_id: ClientId,
    },

    /// Look up a name's public key.
    LookupKey {
        /// Index into [`NAME_POOL`]
        name: u8,
    },

    /// Advance simulation time.
    AdvanceTime {
        /// Milliseconds to advance
        millis: u16,
    },
}

impl Operation {
    /// Client this operation acts for, if any.
    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            Self::Connect { client_id }
            | Self::Disconnect { client_id }
            | Self::Register { client_id, .. }
            | Self::SendMessage { client_id, .. }
            | Self::Leave { client_id } => Some(*client_id),
            Self::LookupKey { .. } | Self::AdvanceTime { .. } => None,
        }
    }
}

/// Claimed sender of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum SenderChoice {
    /// The name the client is registered under, or an unregistered name if
    /// it has none
    Own,
    /// A name from [`NAME_POOL`], possibly someone else's
    Named(u8),
    /// No sender at all
    Missing,
}

impl SenderChoice {
    /// The `from` field to put on the wire, given the client's own name.
    pub fn resolve(self, own: Option<&str>) -> Option<String> {
        match self {
            Self::Own => Some(own.unwrap_or(UNREGISTERED_SENDER).to_string()),
            Self::Named(index) => Some(pool_name(index).to_string()),
            Self::Missing => None,
        }
    }
}

/// Name from [`NAME_POOL`], index taken modulo its length.
pub fn pool_name(index: u8) -> &'static str {
    NAME_POOL[usize::from(index) % NAME_POOL.len()]
}

/// Which envelopes a message carries, relative to the current roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Coverage {
    /// One envelope per registered participant
    Full,
    /// Every participant except one (index modulo roster size)
    DropOne(u8),
    /// Every participant plus a name nobody holds
    WithExtra,
    /// No envelopes
    Empty,
}

/// Name used when a client without an identity sends as itself.
pub const UNREGISTERED_SENDER: &str = "nobody";

/// Name attached by [`Coverage::WithExtra`].
pub const EXTRA_RECIPIENT: &str = "ghost";

impl Coverage {
    /// Recipients to attach envelopes for, given the sorted roster.
    pub fn recipients(self, roster: &BTreeSet<String>) -> BTreeSet<String> {
        let mut recipients = roster.clone();
        match self {
            Self::Full => {},
            Self::DropOne(index) => {
                if !roster.is_empty() {
                    let dropped = usize::from(index) % roster.len();
                    if let Some(name) = roster.iter().nth(dropped) {
                        recipients.remove(name);
                    }
                }
            },
            Self::WithExtra => {
                recipients.insert(EXTRA_RECIPIENT.to_string());
            },
            Self::Empty => recipients.clear(),
        }
        recipients
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded
    Ok,
    /// Key lookup finished
    Lookup {
        /// Whether the name was registered
        found: bool,
    },
    /// Operation was rejected
    Error(OperationError),
}

impl OperationResult {
    /// Whether the operation was accepted.
    pub fn is_ok(&self) -> bool {
        !self.is_err()
    }

    /// Whether the operation was rejected.
    pub fn is_err(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Rejections, mirrored from the relay's error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Client's connection is closed
    NotConnected,
    /// Username or key missing
    MissingFields,
    /// Username shorter than two characters
    UsernameTooShort,
    /// Username held by another connection
    Conflict,
    /// Public key not base64
    MalformedKey,
    /// Message without a sender
    MissingSender,
    /// Sender not bound to this connection
    SenderNotRegistered,
    /// Envelopes missing for these participants
    IncompleteEnvelope(Vec<String>),
}
