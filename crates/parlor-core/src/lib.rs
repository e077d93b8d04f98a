//! Parlor relay core.
//!
//! Sans-IO logic for an end-to-end encrypted group chat relay. The relay
//! never sees plaintext: senders encrypt once per recipient and the relay
//! checks that every registered participant got an envelope before
//! broadcasting.
//!
//! ## Architecture
//!
//! ```text
//! parlor-core
//!   ├─ RelayHub             (mutex + delivery, shared by connection tasks)
//!   │    └─ RelayDriver     (events in, actions out)
//!   │         ├─ ParticipantRegistry  (username <-> identity <-> connection)
//!   │         ├─ relay                (envelope completeness)
//!   │         ├─ presence             (joined / left / snapshot)
//!   │         └─ AuditLog             (AES-256-GCM, append-only)
//!   └─ Environment          (time + randomness)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod driver;
pub mod env;
pub mod error;
pub mod fingerprint;
pub mod hub;
pub mod presence;
pub mod registry;
pub mod relay;

pub use audit::{AuditLog, AuditRecord, ExportToken, LogKey, decrypt_entries, decrypt_entry};
pub use driver::{Outcome, Registered, RelayAction, RelayConfig, RelayDriver, RelayEvent};
pub use env::Environment;
pub use error::{AuditError, DecodeError, ErrorKind, RelayError};
pub use fingerprint::Fingerprint;
pub use hub::{Outbox, RelayHub};
pub use registry::{
    ConnectionId, IdentityRecord, MIN_USERNAME_CHARS, ParticipantRegistry, PendingRegistration,
    Registration,
};
