// src/transport/wire.rs
//! Frame format: `[length: u32 BE][payload: JSON bytes]`.

use std::io::ErrorKind;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::QueueError;

/// Frames above this size are rejected before any allocation happens.
pub(crate) const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Why a frame could not be read off a stream.
pub(crate) enum ReadError {
    /// The peer closed the connection.
    Closed,
    /// The length prefix exceeds [`MAX_FRAME_SIZE`].
    TooLarge(u32),
    Io(std::io::Error),
}

pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, ReadError>
where
    R: AsyncRead + Unpin,
{
    let length = match reader.read_u32().await {
        Ok(length) => length,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(ReadError::Closed),
        Err(e) => return Err(ReadError::Io(e)),
    };
    if length as usize > MAX_FRAME_SIZE {
        return Err(ReadError::TooLarge(length));
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            ReadError::Closed
        } else {
            ReadError::Io(e)
        }
    })?;
    Ok(payload)
}

pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

pub(crate) fn encode(value: &Value) -> Result<Vec<u8>, QueueError> {
    let payload =
        serde_json::to_vec(value).map_err(|e| QueueError::Serialization(e.to_string()))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(QueueError::Serialization(format!(
            "payload of {} bytes exceeds the {MAX_FRAME_SIZE} byte frame cap",
            payload.len()
        )));
    }
    Ok(payload)
}

pub(crate) fn decode(payload: &[u8]) -> Result<Value, QueueError> {
    serde_json::from_slice(payload).map_err(|e| QueueError::Deserialization(e.to_string()))
}

pub(crate) fn too_large(length: u32) -> QueueError {
    QueueError::Deserialization(format!(
        "frame of {length} bytes exceeds the {MAX_FRAME_SIZE} byte cap"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_decode_round_trips() {
        let value = json!({
            "recipe_url": "https://example.com/r/1",
            "retries": 2,
            "tags": ["dessert", "quick"],
            "meta": {"source": "sitemap"},
        });
        let decoded = decode(&encode(&value).unwrap()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        let err = decode(b"{{{").unwrap_err();
        assert!(matches!(err, QueueError::Deserialization(_)));
    }

    #[test]
    fn encode_rejects_oversize_payloads() {
        let blob = "x".repeat(MAX_FRAME_SIZE);
        let err = encode(&json!({ "blob": blob })).unwrap_err();
        assert!(matches!(err, QueueError::Serialization(_)));
    }

    #[tokio::test]
    async fn frames_round_trip_over_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let payload = encode(&json!({"recipe_url": "https://example.com/r/9"})).unwrap();
        write_frame(&mut client, &payload).await.unwrap();
        drop(client);

        let read = read_frame(&mut server).await;
        match read {
            Ok(bytes) => assert_eq!(bytes, payload),
            Err(_) => panic!("expected a frame"),
        }
        assert!(matches!(read_frame(&mut server).await, Err(ReadError::Closed)));
    }

    #[tokio::test]
    async fn oversize_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_u32((MAX_FRAME_SIZE + 1) as u32)
            .await
            .unwrap();

        match read_frame(&mut server).await {
            Err(ReadError::TooLarge(length)) => {
                assert_eq!(length as usize, MAX_FRAME_SIZE + 1)
            }
            _ => panic!("expected TooLarge"),
        }
    }
}
