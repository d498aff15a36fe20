// MAC frame: [dest: 1] [src: 1] [type: 1] [payload: N]

use super::MacFrameType;
use crate::error::{LinkError, Result};
use crate::utils::consts::MAC_HEADER_BYTES;

const DEST: usize = 0;
const SRC: usize = 1;
const TYPE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacFrame {
    bytes: Vec<u8>,
}

impl MacFrame {
    pub fn new(dest: u8, src: u8, frame_type: MacFrameType, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(MAC_HEADER_BYTES + payload.len());
        bytes.push(dest);
        bytes.push(src);
        bytes.push(frame_type.into());
        bytes.extend_from_slice(payload);
        Self { bytes }
    }

    /// Wrap received bytes. The type byte is only checked by
    /// [`MacFrame::frame_type`].
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MAC_HEADER_BYTES {
            return Err(LinkError::MalformedFrame(format!(
                "{} bytes is shorter than a MAC header",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    pub fn dest(&self) -> u8 {
        self.bytes[DEST]
    }

    pub fn src(&self) -> u8 {
        self.bytes[SRC]
    }

    pub fn frame_type(&self) -> Result<MacFrameType> {
        MacFrameType::try_from(self.bytes[TYPE])
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[MAC_HEADER_BYTES..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let frame = MacFrame::new(0x02, 0x01, MacFrameType::Ack, &[9, 8, 7]);
        assert_eq!(frame.as_bytes(), &[0x02, 0x01, 0x01, 9, 8, 7]);

        let parsed = MacFrame::parse(frame.clone().into_bytes()).unwrap();
        assert_eq!(parsed.dest(), 2);
        assert_eq!(parsed.src(), 1);
        assert_eq!(parsed.frame_type().unwrap(), MacFrameType::Ack);
        assert_eq!(parsed.payload(), &[9, 8, 7]);
    }

    #[test]
    fn test_unknown_type() {
        let frame = MacFrame::parse(vec![1, 2, 0x7F, 0]).unwrap();
        assert!(matches!(
            frame.frame_type(),
            Err(LinkError::UnknownFrameType(0x7F))
        ));
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            MacFrame::parse(vec![1, 2]),
            Err(LinkError::MalformedFrame(_))
        ));
    }
}
