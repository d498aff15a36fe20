use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::trace;

use super::{DrainedCallback, SampleSink};
use crate::utils::lock;

/// Playback side of a device. The audio clock pulls blocks with
/// [`PlaybackQueue::fill`]; silence is played when nothing is queued.
pub struct PlaybackQueue {
    buffer: Mutex<VecDeque<f32>>,
    observers: Mutex<Vec<Arc<DrainedCallback>>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Write the next samples into `out`, zero filling the rest. Returns the
    /// number of queued samples played.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let (played, drained) = {
            let mut buffer = lock(&self.buffer);
            let was_empty = buffer.is_empty();
            let played = out.len().min(buffer.len());
            for (slot, sample) in out.iter_mut().zip(buffer.drain(..played)) {
                *slot = sample;
            }
            (played, !was_empty && buffer.is_empty())
        };
        out[played..].fill(0.0);

        if drained {
            trace!("Playback queue drained");
            // callbacks may push again, so run them without the buffer lock
            let observers: Vec<_> = lock(&self.observers).clone();
            for observer in observers {
                observer();
            }
        }
        played
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSink for PlaybackQueue {
    fn push(&self, samples: &[f32]) {
        lock(&self.buffer).extend(samples.iter().copied());
    }

    fn queued(&self) -> usize {
        lock(&self.buffer).len()
    }

    fn on_drained(&self, callback: DrainedCallback) {
        lock(&self.observers).push(Arc::new(callback));
    }
}
