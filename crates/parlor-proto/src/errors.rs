//! Error types for the parlor wire protocol.
//!
//! All errors are structured and testable. Framing errors are raised before
//! any payload is deserialized.

use thiserror::Error;

/// Protocol-level errors that can occur during frame parsing and validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is shorter than the fixed header size
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Invalid magic number in frame header
    #[error("invalid magic number: expected 0x50524C52 (\"PRLR\")")]
    InvalidMagic,

    /// Unsupported protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Unknown frame kind byte
    #[error("invalid frame kind: {0:#04x}")]
    InvalidKind(u8),

    /// Frame kind does not match the payload the caller expected
    #[error("unexpected frame kind: expected {expected:?}, got {actual:?}")]
    UnexpectedKind {
        /// Kind the caller asked to decode
        expected: crate::FrameKind,
        /// Kind carried in the header
        actual: crate::FrameKind,
    },

    /// Payload exceeds maximum allowed size
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Frame is truncated (header claims more data than available)
    #[error("frame truncated: header claims {expected} payload bytes, but only {actual} available")]
    FrameTruncated {
        /// Expected payload size from header
        expected: usize,
        /// Actual bytes available
        actual: usize,
    },

    /// Failed to encode data as CBOR
    #[error("failed to encode CBOR: {0}")]
    CborEncode(String),

    /// Failed to decode CBOR data
    #[error("failed to decode CBOR: {0}")]
    CborDecode(String),
}

/// Convenient Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
