// Physical layer: framing, DPSK modem, preamble sync, transmit and
// receive pipelines

pub mod crc;
pub mod demodulator;
pub mod detector;
pub mod frame;
pub mod modulator;
pub mod receiver;
pub mod transmitter;

pub use demodulator::{DemodStatus, Demodulator, Framing};
pub use detector::{Detection, PowerGate, PreambleDetector};
pub use frame::{LengthPrefix, PhysicalFrame};
pub use modulator::{Modulator, Polarity, SymbolStrategy};
pub use receiver::{ReceiveEvent, ReceiveState, Receiver};
pub use transmitter::{FrameEncoder, TransmitEvent, TransmitState, Transmitter};
