// Stop-and-wait MAC on top of the acoustic physical layer

pub mod backoff;
pub mod frame;
pub mod node;

pub use backoff::BackoffHandler;
pub use frame::MacFrame;
pub use node::{Mac, MacEvent};

use crate::error::LinkError;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacFrameType {
    Data = 0,
    Ack = 1,
    MacPingReq = 2,
    MacPingReply = 3,
    ReTrans = 4,
}

impl TryFrom<u8> for MacFrameType {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MacFrameType::Data),
            1 => Ok(MacFrameType::Ack),
            2 => Ok(MacFrameType::MacPingReq),
            3 => Ok(MacFrameType::MacPingReply),
            4 => Ok(MacFrameType::ReTrans),
            other => Err(LinkError::UnknownFrameType(other)),
        }
    }
}

impl From<MacFrameType> for u8 {
    fn from(frame_type: MacFrameType) -> Self {
        frame_type as u8
    }
}
