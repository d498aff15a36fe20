//! Sample transport between the link and whatever produces or plays audio.
//!
//! The physical layer only sees [`SampleSource`] and [`SampleSink`]. The
//! JACK backend, WAV tooling and the in-process [`LoopbackMedium`] all plug
//! in through these two traits.

pub mod capture;
pub mod loopback;
pub mod playback;

use std::sync::Arc;

pub use capture::CaptureTap;
pub use loopback::LoopbackMedium;
pub use playback::PlaybackQueue;

/// Called from the audio thread with each captured block
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Called once the playback queue has run dry
pub type DrainedCallback = Box<dyn Fn() + Send + Sync>;

pub trait SampleSource: Send + Sync {
    /// Install the capture callback, replacing any previous one
    fn start(&self, callback: SampleCallback);
    /// Remove the callback. Returns after any in-flight delivery finished.
    fn stop(&self);
}

pub trait SampleSink: Send + Sync {
    /// Queue samples behind whatever is already waiting to be played
    fn push(&self, samples: &[f32]);
    /// Samples queued but not yet played
    fn queued(&self) -> usize;
    fn on_drained(&self, callback: DrainedCallback);
}

/// One node's view of an audio device
#[derive(Clone)]
pub struct AudioPort {
    pub source: Arc<dyn SampleSource>,
    pub sink: Arc<dyn SampleSink>,
}

impl AudioPort {
    pub fn new(source: Arc<dyn SampleSource>, sink: Arc<dyn SampleSink>) -> Self {
        Self { source, sink }
    }

    /// A capture tap and playback queue, driven by someone else's clock
    pub fn detached() -> (Self, Arc<CaptureTap>, Arc<PlaybackQueue>) {
        let tap = Arc::new(CaptureTap::new());
        let queue = Arc::new(PlaybackQueue::new());
        let port = Self::new(tap.clone(), queue.clone());
        (port, tap, queue)
    }
}
