//! Reading frames off a byte stream.

use parlor_proto::{Frame, FrameHeader};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ServerError;

/// Read one frame.
///
/// Returns `Ok(None)` when the stream ends before a header starts, or ends
/// inside one. The header is validated before the payload is read, so an
/// oversized length is rejected without allocating for it.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FrameHeader::SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let payload_size = FrameHeader::from_bytes(&header)?.payload_size() as usize;

    let mut buf = vec![0u8; FrameHeader::SIZE + payload_size];
    buf[..FrameHeader::SIZE].copy_from_slice(&header);
    reader.read_exact(&mut buf[FrameHeader::SIZE..]).await?;

    Ok(Some(Frame::decode(&buf)?))
}
