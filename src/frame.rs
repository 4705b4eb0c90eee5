//! Fixed-size frame handling.
//!
//! Every message on the wire is exactly [`FRAME_LEN`] raw bytes with no
//! length prefix and no delimiter:
//!
//! ```text
//! Client:  123456789
//! Server:  123456789   (echo of whatever 9 bytes arrived)
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Length of every frame in bytes.
pub const FRAME_LEN: usize = 9;

/// Payload the client sends on every heartbeat.
pub const HEARTBEAT: [u8; FRAME_LEN] = *b"123456789";

/// Buffer for a single frame.
pub type FrameBuf = [u8; FRAME_LEN];

/// Read one frame from `reader` into `buf`.
///
/// Keeps reading until `FRAME_LEN` bytes have arrived or the peer reaches
/// end-of-stream. Returns the number of bytes filled:
/// - `FRAME_LEN` for a complete frame
/// - `1..FRAME_LEN` for a short frame cut off by end-of-stream
/// - `0` when the stream was already at end-of-stream
pub async fn read_frame<R>(reader: &mut R, buf: &mut FrameBuf) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < FRAME_LEN {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Check whether a read of `len` bytes was a complete frame.
pub fn is_complete(len: usize) -> bool {
    len == FRAME_LEN
}

/// Copy the first `len` bytes of a frame buffer into an owned echo payload.
pub fn echo_payload(buf: &FrameBuf, len: usize) -> Bytes {
    Bytes::copy_from_slice(&buf[..len.min(FRAME_LEN)])
}
