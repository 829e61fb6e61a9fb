//! Native messaging framing
//!
//! Every message is a 32-bit length in native byte order followed by that
//! many bytes of UTF-8 JSON.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::BackendError;
use crate::Result;

pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(BackendError::Protocol(format!(
            "message of {} bytes exceeds frame limit",
            body.len()
        )));
    }

    let len = body.len() as u32;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(BackendError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_frames_over_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, &json!({"action": "getStatus", "requestId": 1}))
            .await
            .unwrap();
        write_frame(&mut client, &json!({"requestId": 2})).await.unwrap();
        drop(client);

        let first = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(first["action"], "getStatus");
        let second = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(second["requestId"], 2);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_header_is_native_endian_length() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, &json!({})).await.unwrap();

        let mut header = [0u8; 4];
        server.read_exact(&mut header).await.unwrap();
        assert_eq!(u32::from_ne_bytes(header), 2);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_LEN as u32) + 1).to_ne_bytes())
            .await
            .unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(BackendError::Protocol(_))
        ));
    }
}
