//! Handshake framing: length-prefix (4 bytes LE) + bincode `Hello`.
//! Chat payloads themselves are raw bytes; only the transport greeting is framed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current protocol version carried in every hello.
pub const PROTOCOL_VERSION: u8 = 1;

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 4 * 1024;

/// Greeting exchanged right after a transport connection opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol_version: u8,
    pub service_id: Uuid,
    /// Display name of the sender.
    pub name: String,
}

impl Hello {
    pub fn new(service_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            service_id,
            name: name.into(),
        }
    }
}

/// Encode a hello into a single frame: 4 bytes LE length + bincode payload.
pub fn encode_hello(hello: &Hello) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(hello).map_err(FrameEncodeError::Encode)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Payload length announced by a frame header, checked against the limit.
pub fn frame_len(header: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_le_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

/// Decode one hello from the front of `bytes`. Returns the hello and the bytes consumed.
pub fn decode_hello(bytes: &[u8]) -> Result<(Hello, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = frame_len([bytes[0], bytes[1], bytes[2], bytes[3]])?;
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let hello: Hello =
        bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len]).map_err(FrameDecodeError::Decode)?;
    Ok((hello, LEN_SIZE + len))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
