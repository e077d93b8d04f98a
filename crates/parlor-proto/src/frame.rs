//! Frame type combining header and payload.
//!
//! Layout on the wire: `[FrameHeader: 12 bytes] + [payload: variable bytes]`.
//! The payload is CBOR; this type only holds the raw bytes.

use bytes::{BufMut, Bytes};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    FrameHeader, FrameKind,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame (transport layer)
///
/// # Invariants
///
/// - `payload.len()` matches `header.payload_size()`. Enforced by
///   [`Frame::new`] and verified by [`Frame::decode`].
/// - `payload.len()` never exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`] on the
///   wire. Oversized frames are rejected by [`Frame::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,

    /// Raw payload bytes (already CBOR-encoded)
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame, deriving `payload_size` from the payload.
    #[must_use]
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        #[allow(clippy::cast_possible_truncation)]
        let header = FrameHeader::new(kind, payload.len() as u32);

        Self { header, payload }
    }

    /// Serialize `value` as CBOR and wrap it in a frame of `kind`.
    pub fn from_payload<T: Serialize>(kind: FrameKind, value: &T) -> Result<Self> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(value, &mut buf)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;

        if buf.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: buf.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(Self::new(kind, buf))
    }

    /// Deserialize the CBOR payload, checking the frame kind first.
    pub fn to_payload<T: DeserializeOwned>(&self, expected: FrameKind) -> Result<T> {
        let actual = self
            .header
            .kind()
            .ok_or_else(|| ProtocolError::InvalidKind(self.header.raw_kind()))?;
        if actual != expected {
            return Err(ProtocolError::UnexpectedKind { expected, actual });
        }

        ciborium::de::from_reader(&self.payload[..])
            .map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }

    /// Encode frame into buffer.
    ///
    /// Writes `[header (12 bytes)] + [payload (variable)]`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if payload exceeds
    /// [`FrameHeader::MAX_PAYLOAD_SIZE`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Encode frame into a fresh buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(FrameHeader::SIZE + self.payload.len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode frame from wire format.
    ///
    /// Only structural framing is validated; the payload stays raw. Trailing
    /// bytes after the declared payload are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = FrameHeader::SIZE + payload_size;

        if bytes.len() < total_size {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..total_size]);

        Ok(Self { header: *header, payload })
    }
}
