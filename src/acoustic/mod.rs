//! Waveform building blocks shared by both directions of the link.

pub mod io;
pub mod preamble;
pub mod similarity;
pub mod sinwave;

pub use preamble::PreambleBuilder;
pub use sinwave::CarrierGenerator;
