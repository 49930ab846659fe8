//! Length-delimited packet framing over a byte stream.
//!
//! A frame is a 4-byte big-endian payload length followed by the bincode
//! encoding of a [`Packet`].

use crate::Packet;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame payload. Chunk payloads and join snapshots are the
/// biggest messages and stay far below this.
pub const MAX_PACKET_SIZE: u32 = 1024 * 1024;

/// Encodes a packet into a complete frame.
pub fn encode_frame(packet: &Packet) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(packet).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_PACKET_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "packet too large: {} bytes (max {})",
                payload.len(),
                MAX_PACKET_SIZE
            ),
        ));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Reads one frame and decodes it.
///
/// A stream that ends before or inside a frame yields `UnexpectedEof`; an
/// oversized length prefix or an undecodable payload yields `InvalidData`.
pub async fn read_packet<R>(reader: &mut R) -> io::Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await?;
    if len > MAX_PACKET_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("packet too large: {len} bytes (max {MAX_PACKET_SIZE})"),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
