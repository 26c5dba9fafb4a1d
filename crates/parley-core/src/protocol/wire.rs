//! Wire format for the Parley byte stream
//!
//! Every frame is a 4-byte big-endian body length followed by a UTF-8 JSON
//! body. The body is tagged by `frame`:
//!
//! ```text
//! {"frame":"request","id":7,"request":{...}}
//! {"frame":"response","id":7,"response":{...}}
//! {"frame":"event","event":{...}}
//! ```
//!
//! Responses repeat the id of the request they answer. Events carry no id,
//! which is what separates a push from a reply on the shared connection.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Event, Request, Response};
use crate::types::CorrelationId;
use crate::{ParleyError, ProtocolError, Result};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound on a frame body (audio messages travel inline)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One unit of wire communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Request { id: CorrelationId, request: Request },
    Response { id: CorrelationId, response: Response },
    Event { event: Event },
}

impl Frame {
    /// Correlation id, absent for push events
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Frame::Request { id, .. } | Frame::Response { id, .. } => Some(*id),
            Frame::Event { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Frame::Request { .. } => "request",
            Frame::Response { .. } => "response",
            Frame::Event { .. } => "event",
        }
    }
}

// ----------------------------------------------------------------------------
// Wire Format Codec
// ----------------------------------------------------------------------------

/// Length-prefixed JSON encoder/decoder for [`Frame`]
#[derive(Debug, Clone, Copy)]
pub struct WireFormat {
    max_frame_size: usize,
}

impl Default for WireFormat {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl WireFormat {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame including its length prefix
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(frame)?;
        self.check_size(body.len())?;

        let mut bytes = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Decode one complete length-prefixed frame
    pub fn decode(&self, bytes: &[u8]) -> Result<Frame> {
        if bytes.len() < LENGTH_PREFIX_SIZE {
            return Err(ParleyError::malformed("Frame too short for length prefix"));
        }

        let (prefix, body) = bytes.split_at(LENGTH_PREFIX_SIZE);
        let declared = Self::body_length(prefix)?;
        self.check_size(declared)?;

        if body.len() != declared {
            return Err(ParleyError::malformed(format!(
                "Declared body length {} but got {} bytes",
                declared,
                body.len()
            )));
        }

        Self::decode_body(body)
    }

    /// Decode a frame body without its prefix
    pub fn decode_body(body: &[u8]) -> Result<Frame> {
        serde_json::from_slice(body).map_err(|e| ParleyError::malformed(e.to_string()))
    }

    /// Read the next frame from a stream
    ///
    /// Returns `Ok(None)` on a clean end of stream at a frame boundary. An end
    /// of stream inside a frame is a lost connection. A body that is not a
    /// valid frame is a protocol error, and the stream stays positioned at the
    /// next frame boundary.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_SIZE {
            let read = reader.read(&mut prefix[filled..]).await.map_err(lost)?;
            if read == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(ParleyError::connection_lost(
                    "stream ended inside a length prefix",
                ));
            }
            filled += read;
        }

        let length = Self::body_length(&prefix)?;
        if length > self.max_frame_size {
            // The stream cannot be resynchronised without reading the oversize body
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            }
            .into());
        }

        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await.map_err(lost)?;
        Self::decode_body(&body).map(Some)
    }

    /// Encode and write one frame, flushing the writer
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &Frame) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = self.encode(frame)?;
        writer.write_all(&bytes).await.map_err(lost)?;
        writer.flush().await.map_err(lost)?;
        Ok(())
    }

    fn body_length(prefix: &[u8]) -> Result<usize> {
        let prefix: [u8; LENGTH_PREFIX_SIZE] = prefix
            .try_into()
            .map_err(|_| ParleyError::malformed("Invalid length prefix"))?;
        Ok(u32::from_be_bytes(prefix) as usize)
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }
            .into());
        }
        Ok(())
    }
}

fn lost(err: std::io::Error) -> ParleyError {
    ParleyError::connection_lost(err.to_string())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EventKind, OperationKind, Payload};

    fn ping(id: u64) -> Frame {
        Frame::Request {
            id: CorrelationId::new(id),
            request: Request::new(OperationKind::Ping, Payload::new().with("echo", "hi")),
        }
    }

    #[test]
    fn test_request_frame_shape() {
        let json = serde_json::to_value(ping(7)).unwrap();
        assert_eq!(json["frame"], "request");
        assert_eq!(json["id"], 7);
        assert_eq!(json["request"]["kind"], "PING");
        assert_eq!(json["request"]["payload"]["echo"], "hi");
    }

    #[test]
    fn test_event_frame_has_no_correlation() {
        let frame = Frame::Event {
            event: Event::new(EventKind::Broadcast, serde_json::json!({"text": "hello"})),
        };
        assert_eq!(frame.correlation_id(), None);
        assert_eq!(ping(3).correlation_id(), Some(CorrelationId::new(3)));
    }

    #[test]
    fn test_oversize_frame_is_rejected_on_encode() {
        let codec = WireFormat::new(16);
        let err = codec.encode(&ping(1)).unwrap_err();
        assert!(matches!(
            err,
            ParleyError::Protocol(ProtocolError::FrameTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let codec = WireFormat::default();
        let mut bytes = codec.encode(&ping(1)).unwrap();
        bytes.pop();
        assert!(codec.decode(&bytes).is_err());
    }

    #[tokio::test]
    async fn test_stream_read_sequence_and_clean_eof() {
        let codec = WireFormat::default();
        let mut buffer = Vec::new();
        codec.write_frame(&mut buffer, &ping(1)).await.unwrap();
        codec.write_frame(&mut buffer, &ping(2)).await.unwrap();

        let mut reader = buffer.as_slice();
        assert_eq!(codec.read_frame(&mut reader).await.unwrap(), Some(ping(1)));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap(), Some(ping(2)));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_connection_lost() {
        let codec = WireFormat::default();
        let bytes = codec.encode(&ping(1)).unwrap();

        let mut reader = &bytes[..bytes.len() - 3];
        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(err.is_connection_lost());

        let mut reader = &bytes[..2];
        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_malformed_body_keeps_stream_aligned() {
        let codec = WireFormat::default();
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&5u32.to_be_bytes());
        buffer.extend_from_slice(b"nope!");
        codec.write_frame(&mut buffer, &ping(9)).await.unwrap();

        let mut reader = buffer.as_slice();
        assert!(matches!(
            codec.read_frame(&mut reader).await,
            Err(ParleyError::Protocol(ProtocolError::MalformedFrame { .. }))
        ));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap(), Some(ping(9)));
    }
}
