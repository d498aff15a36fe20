use thiserror::Error;

use crate::mac::MacFrameType;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("no acknowledgement from node {dest} after {attempts} attempts")]
    AckTimeout { dest: u8, attempts: u32 },

    #[error("frame type {0:?} is not supported")]
    Unsupported(MacFrameType),

    #[error("unknown frame type 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("transmitter is closed")]
    TransmitterClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
