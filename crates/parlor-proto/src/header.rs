//! Frame header implementation with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 12-byte structure serialized as raw binary
//! (Big Endian). The reader only needs the header to know how many payload
//! bytes follow and which direction the payload travels.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Direction of a frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Client to server: payload is a CBOR [`crate::ClientRequest`]
    Request = 0x01,
    /// Server to client: payload is a CBOR [`crate::ServerMessage`]
    Server = 0x02,
}

impl FrameKind {
    /// Parse the kind byte carried in the header.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::Server),
            _ => None,
        }
    }
}

/// Fixed 12-byte frame header (Big Endian network byte order)
///
/// Fields are stored as raw byte arrays so every 12-byte pattern is a valid
/// value and the header can be cast straight out of untrusted network bytes.
#[repr(C, packed)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 4],    // 0x50524C52 ("PRLR")
    version: u8,       // 0x01
    kind: u8,          // FrameKind
    reserved: [u8; 2], // zero
    payload_size: [u8; 4],
}

impl FrameHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 12;

    /// Magic number: "PRLR" in ASCII (0x50524C52)
    pub const MAGIC: u32 = 0x5052_4C52;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (1 MiB)
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Create a header for a payload of the given kind and size.
    #[must_use]
    pub fn new(kind: FrameKind, payload_size: u32) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            kind: kind as u8,
            reserved: [0; 2],
            payload_size: payload_size.to_be_bytes(),
        }
    }

    /// Parse header from network bytes (zero-copy).
    ///
    /// Trailing bytes after the header are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if:
    /// - Buffer is too short (< 12 bytes)
    /// - Magic number is invalid
    /// - Protocol version is unsupported
    /// - Kind byte is unknown
    /// - Payload size exceeds maximum
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        if FrameKind::from_u8(header.kind).is_none() {
            return Err(ProtocolError::InvalidKind(header.kind));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes
    #[must_use]
    #[allow(clippy::wrong_self_convention)]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Get the protocol version
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Get the frame kind.
    ///
    /// Headers obtained through [`FrameHeader::from_bytes`] or
    /// [`FrameHeader::new`] always carry a known kind.
    #[must_use]
    pub fn kind(&self) -> Option<FrameKind> {
        FrameKind::from_u8(self.kind)
    }

    pub(crate) fn raw_kind(&self) -> u8 {
        self.kind
    }

    /// Get the payload size
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("version", &self.version())
            .field("kind", &self.kind())
            .field("payload_size", &self.payload_size())
            .finish()
    }
}
