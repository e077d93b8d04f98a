//! Parlor wire protocol.
//!
//! Frames are a fixed 12-byte binary header followed by a CBOR payload:
//!
//! ```text
//! ┌──────────────────────────── FrameHeader (12 bytes) ───────────────┐
//! │ magic "PRLR" (4) │ version (1) │ kind (1) │ reserved (2) │ size (4) │
//! └───────────────────────────────────────────────────────────────────┘
//! ┌──────────── payload (size bytes, CBOR) ────────────┐
//! │ ClientRequest (kind = 1) │ ServerMessage (kind = 2) │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! This crate performs no I/O.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod frame;
pub mod header;
pub mod message;
pub mod rejection;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::{FrameHeader, FrameKind};
pub use message::{
    AuditLogEntry, ClientRequest, OutgoingMessage, ParticipantSummary, PublicKeyReply,
    RegisterRequest, RelayedMessage, ServerMessage,
};
pub use rejection::RejectionReason;
