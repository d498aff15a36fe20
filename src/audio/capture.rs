use std::sync::Mutex;

use super::{SampleCallback, SampleSource};
use crate::utils::lock;

/// Capture side of a device: whoever owns the audio clock calls
/// [`CaptureTap::deliver`] with each input block.
pub struct CaptureTap {
    callback: Mutex<Option<SampleCallback>>,
}

impl CaptureTap {
    pub fn new() -> Self {
        Self {
            callback: Mutex::new(None),
        }
    }

    /// Forward a block to the installed callback. Returns whether anyone was
    /// listening.
    pub fn deliver(&self, samples: &[f32]) -> bool {
        let mut callback = lock(&self.callback);
        match callback.as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        lock(&self.callback).is_some()
    }
}

impl Default for CaptureTap {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for CaptureTap {
    fn start(&self, callback: SampleCallback) {
        *lock(&self.callback) = Some(callback);
    }

    fn stop(&self) {
        // waits for a delivery holding the lock
        lock(&self.callback).take();
    }
}
