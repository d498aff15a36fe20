use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{debug, error, info, warn};

use super::frame::{LengthPrefix, PhysicalFrame};
use super::modulator::Modulator;
use crate::audio::SampleSink;
use crate::context::LinkContext;
use crate::error::{LinkError, Result};
use crate::utils::consts::CHANNEL_CAPACITY;
use crate::utils::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitState {
    Idle,
    Transmitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitEvent {
    /// Everything queued so far has been played
    PlayComplete,
}

/// Turns one payload into the samples of one frame on air:
/// `preamble ‖ modulated(length ‖ payload ‖ crc32) ‖ silence`
pub struct FrameEncoder {
    preamble: Arc<[f32]>,
    modulator: Modulator,
    gain: f32,
    prefix: LengthPrefix,
    gap: usize,
}

impl FrameEncoder {
    pub fn new(context: &LinkContext) -> Self {
        let config = context.config();
        Self {
            preamble: context.preamble(),
            modulator: Modulator::new(config),
            gain: config.gain,
            prefix: config.length_prefix,
            gap: config.inter_frame_gap_samples(),
        }
    }

    pub fn encode(&mut self, payload: &[u8]) -> Result<Vec<f32>> {
        let frame = PhysicalFrame::encode(payload, self.prefix)?;
        let modulated = self.modulator.modulate(&frame);

        let mut samples =
            Vec::with_capacity(self.preamble.len() + modulated.len() + self.gap);
        samples.extend(self.preamble.iter().map(|x| x * self.gain));
        samples.extend_from_slice(&modulated);
        samples.resize(samples.len() + self.gap, 0.0);
        Ok(samples)
    }
}

/// Queues fixed-size payloads for playback.
///
/// A worker thread encodes frames in order and pushes them to the sink.
/// The state returns to [`TransmitState::Idle`] when the sink reports that
/// it drained and no payload is waiting in the queue.
pub struct Transmitter {
    frame_bytes: usize,
    airtime: Duration,
    queue: Mutex<Option<Sender<Vec<u8>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<Mutex<TransmitState>>,
    in_flight: Arc<AtomicUsize>,
    events: Receiver<TransmitEvent>,
}

impl Transmitter {
    pub fn new(
        context: &LinkContext,
        sink: Arc<dyn SampleSink>,
        frame_bytes: usize,
    ) -> Self {
        let (queue_tx, queue_rx) = bounded::<Vec<u8>>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = bounded(CHANNEL_CAPACITY);
        let state = Arc::new(Mutex::new(TransmitState::Idle));
        let in_flight = Arc::new(AtomicUsize::new(0));

        sink.on_drained(Self::drained_observer(
            state.clone(),
            in_flight.clone(),
            Arc::downgrade(&sink),
            event_tx,
        ));

        let mut encoder = FrameEncoder::new(context);
        let worker_state = state.clone();
        let worker_in_flight = in_flight.clone();
        let worker = thread::spawn(move || {
            for payload in queue_rx.iter() {
                match encoder.encode(&payload) {
                    Ok(samples) => {
                        let mut state = lock(&worker_state);
                        *state = TransmitState::Transmitting;
                        worker_in_flight.fetch_sub(1, Ordering::SeqCst);
                        sink.push(&samples);
                        debug!(
                            "Queued frame: {} payload bytes, {} samples",
                            payload.len(),
                            samples.len()
                        );
                    }
                    Err(e) => {
                        worker_in_flight.fetch_sub(1, Ordering::SeqCst);
                        error!("Dropping frame: {}", e);
                    }
                }
            }
            debug!("Transmit worker finished");
        });

        let airtime = context
            .config()
            .samples_to_duration(context.frame_samples(frame_bytes));
        info!(
            "Transmitter ready: {}-byte frames, {:?} on air each",
            frame_bytes, airtime
        );

        Self {
            frame_bytes,
            airtime,
            queue: Mutex::new(Some(queue_tx)),
            worker: Mutex::new(Some(worker)),
            state,
            in_flight,
            events: event_rx,
        }
    }

    fn drained_observer(
        state: Arc<Mutex<TransmitState>>,
        in_flight: Arc<AtomicUsize>,
        sink: Weak<dyn SampleSink>,
        events: Sender<TransmitEvent>,
    ) -> Box<dyn Fn() + Send + Sync> {
        Box::new(move || {
            let mut state = lock(&state);
            if *state != TransmitState::Transmitting
                || in_flight.load(Ordering::SeqCst) > 0
            {
                return;
            }
            if sink.upgrade().is_some_and(|sink| sink.queued() > 0) {
                return;
            }
            *state = TransmitState::Idle;
            match events.try_send(TransmitEvent::PlayComplete) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Transmit event channel full, dropping PlayComplete")
                }
            }
        })
    }

    pub fn add_payload(&self, payload: &[u8]) -> Result<()> {
        if payload.len() != self.frame_bytes {
            return Err(LinkError::LengthMismatch {
                expected: self.frame_bytes,
                actual: payload.len(),
            });
        }
        let sender = lock(&self.queue)
            .clone()
            .ok_or(LinkError::TransmitterClosed)?;

        {
            // counted before the state flips so a drain in between can't
            // report completion
            let mut state = lock(&self.state);
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            *state = TransmitState::Transmitting;
        }
        sender.send(payload.to_vec()).map_err(|_| {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            LinkError::TransmitterClosed
        })
    }

    /// Close the queue and wait until every queued frame reached the sink
    pub fn complete(&self) {
        let closed = lock(&self.queue).take().is_some();
        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                error!("Transmit worker panicked");
            }
        }
        if closed {
            debug!("Transmitter closed");
        }
    }

    pub fn state(&self) -> TransmitState {
        *lock(&self.state)
    }

    pub fn events(&self) -> Receiver<TransmitEvent> {
        self.events.clone()
    }

    /// Time one frame occupies on air
    pub fn airtime(&self) -> Duration {
        self.airtime
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioPort, DrainedCallback, PlaybackQueue};
    use crate::config::LinkConfig;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    /// Keeps everything pushed to it, so it never legitimately drains
    #[derive(Default)]
    struct HeldSink {
        pushed: AtomicUsize,
        observer: Mutex<Option<Arc<DrainedCallback>>>,
    }

    impl HeldSink {
        fn drain_signal(&self) {
            let observer = lock(&self.observer).clone();
            if let Some(observer) = observer {
                observer();
            }
        }
    }

    impl SampleSink for HeldSink {
        fn push(&self, samples: &[f32]) {
            self.pushed.fetch_add(samples.len(), Ordering::SeqCst);
        }

        fn queued(&self) -> usize {
            self.pushed.load(Ordering::SeqCst)
        }

        fn on_drained(&self, callback: DrainedCallback) {
            *lock(&self.observer) = Some(Arc::new(callback));
        }
    }

    fn wait_for_samples(queue: &PlaybackQueue, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.queued() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_frame_layout() {
        let context = LinkContext::new(LinkConfig::default()).unwrap();
        let mut encoder = FrameEncoder::new(&context);
        let samples = encoder.encode(&[0x42; 16]).unwrap();
        assert_eq!(samples.len(), context.frame_samples(16));

        let preamble = context.preamble();
        for (s, p) in samples.iter().zip(preamble.iter()) {
            assert!((s - p * 0.8).abs() < 1e-6);
        }
        let gap = context.config().inter_frame_gap_samples();
        assert!(samples[samples.len() - gap..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_rejects_wrong_size() {
        let context = LinkContext::new(LinkConfig::default()).unwrap();
        let (port, _, _) = AudioPort::detached();
        let transmitter = Transmitter::new(&context, port.sink, 8);
        assert!(matches!(
            transmitter.add_payload(&[0; 7]),
            Err(LinkError::LengthMismatch {
                expected: 8,
                actual: 7
            })
        ));
        assert_eq!(transmitter.state(), TransmitState::Idle);
    }

    #[test]
    fn test_state_follows_playback() {
        let context = LinkContext::new(LinkConfig::default()).unwrap();
        let (port, _, queue) = AudioPort::detached();
        let transmitter = Transmitter::new(&context, port.sink, 8);
        let events = transmitter.events();

        transmitter.add_payload(&[1; 8]).unwrap();
        transmitter.add_payload(&[2; 8]).unwrap();
        assert_eq!(transmitter.state(), TransmitState::Transmitting);

        let expected = 2 * context.frame_samples(8);
        wait_for_samples(&queue, expected);
        assert_eq!(queue.queued(), expected);

        let mut block = vec![0.0; 1000];
        while queue.queued() > 0 {
            queue.fill(&mut block);
            assert!(queue.queued() == 0 || transmitter.state() == TransmitState::Transmitting);
        }
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)),
            Ok(TransmitEvent::PlayComplete)
        );
        assert_eq!(transmitter.state(), TransmitState::Idle);
    }

    #[test]
    fn test_drain_during_enqueue_is_not_completion() {
        let context = LinkContext::new(LinkConfig::default()).unwrap();
        for _ in 0..200 {
            let sink = Arc::new(HeldSink::default());
            let transmitter = Transmitter::new(&context, sink.clone(), 8);
            let events = transmitter.events();
            let stop = AtomicBool::new(false);

            thread::scope(|scope| {
                scope.spawn(|| {
                    while !stop.load(Ordering::SeqCst) {
                        sink.drain_signal();
                    }
                });
                transmitter.add_payload(&[7; 8]).unwrap();
                stop.store(true, Ordering::SeqCst);
            });

            assert!(events.try_recv().is_err());
            assert_eq!(transmitter.state(), TransmitState::Transmitting);
        }
    }

    #[test]
    fn test_closed_after_complete() {
        let context = LinkContext::new(LinkConfig::default()).unwrap();
        let (port, _, queue) = AudioPort::detached();
        let transmitter = Transmitter::new(&context, port.sink, 4);
        transmitter.add_payload(b"last").unwrap();
        transmitter.complete();
        // the queued frame was still delivered
        assert_eq!(queue.queued(), context.frame_samples(4));
        assert!(matches!(
            transmitter.add_payload(b"more"),
            Err(LinkError::TransmitterClosed)
        ));
    }
}
