//! Acoustic data link: a DPSK modem with chirp synchronization and a
//! stop-and-wait MAC, carried over any mono `f32` audio stream.

pub mod acoustic;
pub mod audio;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod mac;
pub mod phy;
pub mod utils;

pub use config::LinkConfig;
pub use context::LinkContext;
pub use error::{LinkError, Result};
