// Frame format: [Preamble] [Length: 1|2, BE] [Payload] [CRC32: 4, LE]
//
// Length counts the payload and CRC bytes that follow it. The CRC covers
// the length prefix and the payload.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::crc::{append_crc32, verify_crc32};
use crate::error::{LinkError, Result};
use crate::utils::consts::CRC_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthPrefix {
    OneByte,
    TwoBytes,
}

impl LengthPrefix {
    pub fn size(self) -> usize {
        match self {
            LengthPrefix::OneByte => 1,
            LengthPrefix::TwoBytes => 2,
        }
    }

    /// Largest payload + CRC length the prefix can declare
    pub fn max_length(self) -> usize {
        match self {
            LengthPrefix::OneByte => u8::MAX as usize,
            LengthPrefix::TwoBytes => u16::MAX as usize,
        }
    }

    pub fn write(self, length: usize, out: &mut Vec<u8>) {
        match self {
            LengthPrefix::OneByte => out.push(length as u8),
            LengthPrefix::TwoBytes => {
                let mut buf = [0u8; 2];
                BigEndian::write_u16(&mut buf, length as u16);
                out.extend_from_slice(&buf);
            }
        }
    }

    /// Caller guarantees `bytes.len() >= self.size()`
    pub fn read(self, bytes: &[u8]) -> usize {
        match self {
            LengthPrefix::OneByte => bytes[0] as usize,
            LengthPrefix::TwoBytes => BigEndian::read_u16(bytes) as usize,
        }
    }
}

/// Result of unpacking a received physical frame
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalFrame {
    pub payload: Vec<u8>,
    pub crc_ok: bool,
}

impl PhysicalFrame {
    /// Serialize `payload` into `length ‖ payload ‖ crc32`
    pub fn encode(payload: &[u8], prefix: LengthPrefix) -> Result<Vec<u8>> {
        let length = payload.len() + CRC_BYTES;
        if length > prefix.max_length() {
            return Err(LinkError::MalformedFrame(format!(
                "{}-byte payload exceeds {:?} prefix",
                payload.len(),
                prefix
            )));
        }

        let mut bytes = Vec::with_capacity(prefix.size() + length);
        prefix.write(length, &mut bytes);
        bytes.extend_from_slice(payload);
        append_crc32(&mut bytes);
        Ok(bytes)
    }

    /// Deserialize a complete frame (prefix included). A CRC mismatch is
    /// not an error: the payload comes back flagged with `crc_ok = false`.
    pub fn decode(bytes: &[u8], prefix: LengthPrefix) -> Result<Self> {
        if bytes.len() < prefix.size() {
            return Err(LinkError::MalformedFrame(
                "frame shorter than its length prefix".into(),
            ));
        }
        let length = prefix.read(bytes);
        if length < CRC_BYTES || bytes.len() != prefix.size() + length {
            return Err(LinkError::MalformedFrame(format!(
                "length prefix {} does not match {} frame bytes",
                length,
                bytes.len()
            )));
        }

        let crc_ok = verify_crc32(bytes);
        if !crc_ok {
            debug!("CRC check failed");
        }
        let payload = bytes[prefix.size()..bytes.len() - CRC_BYTES].to_vec();
        Ok(Self { payload, crc_ok })
    }
}
