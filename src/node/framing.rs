//! Wire framing for the node runtime's TCP/UDP transports.
//!
//! Two framing strategies apply to stream (TCP) sockets: opaque (one `recv`
//! call = one message, no reassembly) and SPEC (length-prefixed, header
//! layout declared by the interface contract, partial reads re-attempted
//! until the full frame is assembled). Datagram (UDP) sockets preserve
//! message boundaries at the OS level, so a single `recv_from` always
//! yields one complete frame regardless of mode.
//!
//! Messaging-socket nodes (ZMQ_REQ/REP/PUSH/PULL) use their own minimal
//! length-prefixed wire representation ([`read_socket_frame`] /
//! [`write_socket_frame`]), independent of the interface's SPEC byte order —
//! this is simply this crate's choice of "a" messaging transport, not "the"
//! one any particular library would use.
//!
//! Every reader/writer here is generic over `AsyncRead`/`AsyncWrite` rather
//! than tied to `TcpStream`, so the node runtime can drive them directly
//! over a split connection's `ReadHalf`/`WriteHalf` without duplicating the
//! framing logic per half.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::interface::{ByteOrder, MessageInterface};

/// Opaque framing: read up to 4096 bytes in a single `recv` call and treat
/// the whole buffer as one message. Returns `None` on clean EOF.
pub async fn read_opaque_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await.context("opaque frame read")?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(buf))
}

/// SPEC length-prefixed framing:
/// 1. Read exactly `end` bytes (header).
/// 2. Decode `length = int(header[start:end])` in the declared byte order.
/// 3. Read `length - 8` more bytes, appending to the header.
/// 4. Hand the full frame to the dispatcher.
///
/// Partial reads are re-attempted (via repeated `read`/`read_exact` calls)
/// until the full frame is assembled, so a peer writing one byte at a time
/// still reassembles correctly. Returns `None` on EOF before any bytes of
/// the next frame arrive; a peer EOF mid-frame is a hard error that
/// terminates the connection.
pub async fn read_spec_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    interface: &dyn MessageInterface,
) -> Result<Option<Vec<u8>>> {
    let (start, end) = interface.message_length_start_end_bytes();
    let mut header = vec![0u8; end];
    if !read_exact_or_eof(stream, &mut header).await? {
        return Ok(None);
    }
    let length_field = &header[start..end];
    let length = decode_length(length_field, interface.byte_order());
    if (length as usize) < end {
        return Err(anyhow!(
            "declared frame length {length} shorter than header length {end}"
        ));
    }
    let remaining = length as usize - 8;
    let mut body = vec![0u8; remaining];
    stream
        .read_exact(&mut body)
        .await
        .context("SPEC frame body read (peer EOF mid-frame)")?;
    let mut frame = header;
    frame.extend_from_slice(&body);
    Ok(Some(frame))
}

/// Like `AsyncReadExt::read_exact`, but returns `Ok(false)` instead of an
/// error when EOF arrives before any byte of `buf` has been read (a clean
/// "no more frames" condition rather than a mid-frame failure).
async fn read_exact_or_eof<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream
            .read(&mut buf[filled..])
            .await
            .context("frame header read")?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(anyhow!("peer EOF mid-header"));
        }
        filled += n;
    }
    Ok(true)
}

/// The length integer always sits at the front of `field` (i.e. at the
/// interface's declared `start` offset) regardless of byte order — byte
/// order governs how those bytes encode the integer, not where they sit
/// within the header. `field` may be wider than 4 bytes (reserved header
/// padding); only the leading 4 bytes are read.
fn decode_length(field: &[u8], order: ByteOrder) -> u32 {
    let take = field.len().min(4);
    let mut bytes = [0u8; 4];
    bytes[..take].copy_from_slice(&field[..take]);
    match order {
        ByteOrder::Big => u32::from_be_bytes(bytes),
        ByteOrder::Little => u32::from_le_bytes(bytes),
    }
}

/// This crate's minimal wire representation for messaging-socket nodes: a
/// 4-byte big-endian length prefix followed by the body.
pub async fn read_socket_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if !read_exact_or_eof(stream, &mut len_buf).await? {
        return Ok(None);
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .context("socket frame body read (peer EOF mid-frame)")?;
    Ok(Some(body))
}

pub async fn write_socket_frame<W: AsyncWrite + Unpin>(stream: &mut W, body: &[u8]) -> Result<()> {
    let len = body.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::json::JsonInterface;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn spec_frame_reassembles_across_single_byte_writes() {
        let (mut client, mut server) = loopback_pair().await;
        let iface = JsonInterface::new();
        let frame = iface.serialize("Ping", &serde_json::json!({"seq": 42}));
        let writer = tokio::spawn(async move {
            for byte in frame {
                client.write_all(&[byte]).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        });
        let received = read_spec_frame(&mut server, &iface).await.unwrap().unwrap();
        writer.await.unwrap();
        let ty = iface.message_type_of(&received).unwrap();
        assert_eq!(ty, "Ping");
    }

    #[tokio::test]
    async fn socket_frame_round_trips() {
        let (mut client, mut server) = loopback_pair().await;
        write_socket_frame(&mut client, b"__ping__").await.unwrap();
        let received = read_socket_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(received, b"__ping__");
    }
}
