use std::sync::{Arc, Mutex, TryLockError};

use crossbeam_channel::{self as channel, Sender, TrySendError, bounded};
use tracing::{debug, info, trace, warn};

use super::demodulator::{DemodStatus, Demodulator, Framing};
use super::detector::{Detection, PreambleDetector};
use super::frame::{LengthPrefix, PhysicalFrame};
use crate::audio::SampleSource;
use crate::context::LinkContext;
use crate::utils::consts::CHANNEL_CAPACITY;
use crate::utils::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Stopped,
    Syncing,
    Decoding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// A preamble ended at this sample index, counted from `start_receive`
    PacketDetected { position: usize },
    DataAvailable { payload: Vec<u8>, crc_ok: bool },
}

struct ReceiverCore {
    state: ReceiveState,
    detector: PreambleDetector,
    demodulator: Demodulator,
    framing: Framing,
    prefix: LengthPrefix,
    sync_buffer: Vec<f32>,
    /// Stream index of `sync_buffer[0]`
    sync_base: usize,
    /// Stream index of the current frame's first data sample
    frame_start: usize,
    events: Sender<ReceiveEvent>,
}

impl ReceiverCore {
    fn reset(&mut self, state: ReceiveState) {
        self.state = state;
        self.detector.reset();
        self.sync_buffer.clear();
        self.sync_base = 0;
        self.frame_start = 0;
    }

    fn process(&mut self, samples: &[f32]) {
        match self.state {
            ReceiveState::Stopped => return,
            ReceiveState::Syncing => self.sync_buffer.extend_from_slice(samples),
            ReceiveState::Decoding => self.demodulator.push_samples(samples),
        }
        self.advance();
    }

    fn advance(&mut self) {
        loop {
            match self.state {
                ReceiveState::Stopped => return,
                ReceiveState::Syncing => match self.detector.scan(&self.sync_buffer) {
                    Detection::Found(offset) => {
                        let position = self.sync_base + offset;
                        debug!("Packet detected at sample {}", position);
                        self.emit(ReceiveEvent::PacketDetected { position });

                        self.frame_start = position + 1;
                        self.demodulator
                            .start_frame(self.framing, &self.sync_buffer, offset + 1);
                        self.sync_buffer.clear();
                        self.detector.reset();
                        self.state = ReceiveState::Decoding;
                    }
                    Detection::NotFound { consumed } => {
                        self.sync_buffer.drain(..consumed);
                        self.sync_base += consumed;
                        return;
                    }
                },
                ReceiveState::Decoding => match self.demodulator.poll() {
                    DemodStatus::Pending => return,
                    DemodStatus::Complete(bytes) => {
                        match PhysicalFrame::decode(&bytes, self.prefix) {
                            Ok(frame) => {
                                if !frame.crc_ok {
                                    warn!("CRC mismatch in {}-byte frame", frame.payload.len());
                                }
                                self.emit(ReceiveEvent::DataAvailable {
                                    payload: frame.payload,
                                    crc_ok: frame.crc_ok,
                                });
                            }
                            Err(e) => warn!("Discarding frame: {}", e),
                        }
                        let next = self.frame_start + self.demodulator.consumed_samples();
                        let leftover = self.demodulator.remaining_samples().to_vec();
                        self.resync(next, leftover);
                    }
                    DemodStatus::Invalid { declared } => {
                        warn!("Frame declared {} bytes, resynchronizing", declared);
                        let leftover = self.demodulator.frame_samples().to_vec();
                        self.resync(self.frame_start, leftover);
                    }
                },
            }
        }
    }

    fn resync(&mut self, base: usize, samples: Vec<f32>) {
        trace!("Resync at sample {} with {} samples", base, samples.len());
        self.sync_base = base;
        self.sync_buffer = samples;
        self.state = ReceiveState::Syncing;
    }

    fn emit(&self, event: ReceiveEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Receive event channel full, dropping {:?}", event)
            }
        }
    }
}

struct ReceiverShared {
    pending: Mutex<Vec<f32>>,
    core: Mutex<ReceiverCore>,
}

impl ReceiverShared {
    fn push(&self, samples: &[f32]) {
        lock(&self.pending).extend_from_slice(samples);
        self.drain();
    }

    /// At most one thread processes; others leave their samples pending
    fn drain(&self) {
        loop {
            {
                let mut core = match self.core.try_lock() {
                    Ok(core) => core,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => return,
                };
                loop {
                    let batch = std::mem::take(&mut *lock(&self.pending));
                    if batch.is_empty() {
                        break;
                    }
                    core.process(&batch);
                }
            }
            // samples may have arrived while the core was being released
            if lock(&self.pending).is_empty() {
                return;
            }
        }
    }
}

/// Receiving half of the physical layer.
///
/// Captured samples are searched for a preamble, the frame behind it is
/// demodulated and CRC-checked, and the result is published on the event
/// channel. Frames failing the CRC are still published, flagged.
pub struct Receiver {
    source: Arc<dyn SampleSource>,
    shared: Arc<ReceiverShared>,
    events: channel::Receiver<ReceiveEvent>,
}

impl Receiver {
    pub fn new(context: &LinkContext, source: Arc<dyn SampleSource>) -> Self {
        let config = context.config();
        let (event_tx, event_rx) = bounded(CHANNEL_CAPACITY);
        let core = ReceiverCore {
            state: ReceiveState::Stopped,
            detector: PreambleDetector::new(context.preamble(), config),
            demodulator: Demodulator::new(config),
            framing: Framing::LengthPrefixed(config.length_prefix),
            prefix: config.length_prefix,
            sync_buffer: Vec::new(),
            sync_base: 0,
            frame_start: 0,
            events: event_tx,
        };
        Self {
            source,
            shared: Arc::new(ReceiverShared {
                pending: Mutex::new(Vec::new()),
                core: Mutex::new(core),
            }),
            events: event_rx,
        }
    }

    pub fn start_receive(&self) {
        lock(&self.shared.pending).clear();
        lock(&self.shared.core).reset(ReceiveState::Syncing);

        let shared = self.shared.clone();
        self.source
            .start(Box::new(move |samples| shared.push(samples)));
        info!("Receiver started");
    }

    /// Stop capturing. No event is emitted once this returns.
    pub fn stop_receive(&self) {
        self.source.stop();
        lock(&self.shared.core).reset(ReceiveState::Stopped);
        lock(&self.shared.pending).clear();
        info!("Receiver stopped");
    }

    /// Feed samples directly, bypassing the source
    pub fn push_samples(&self, samples: &[f32]) {
        self.shared.push(samples);
    }

    pub fn state(&self) -> ReceiveState {
        lock(&self.shared.core).state
    }

    pub fn events(&self) -> channel::Receiver<ReceiveEvent> {
        self.events.clone()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.source.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioPort, CaptureTap};
    use crate::config::LinkConfig;
    use crate::phy::transmitter::FrameEncoder;
    use std::time::Duration;

    fn setup() -> (Arc<LinkContext>, Receiver, Arc<CaptureTap>) {
        let context = LinkContext::new(LinkConfig::default()).unwrap();
        let (port, tap, _) = AudioPort::detached();
        let receiver = Receiver::new(&context, port.source);
        (context, receiver, tap)
    }

    fn drain(receiver: &Receiver) -> Vec<ReceiveEvent> {
        receiver.events().try_iter().collect()
    }

    #[test]
    fn test_stopped_receiver_ignores_samples() {
        let (context, receiver, _) = setup();
        let samples = FrameEncoder::new(&context).encode(b"ignored").unwrap();
        receiver.push_samples(&samples);
        receiver.push_samples(&vec![0.0; 4096]);
        assert_eq!(receiver.state(), ReceiveState::Stopped);
        assert!(drain(&receiver).is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        let (context, receiver, tap) = setup();
        let mut encoder = FrameEncoder::new(&context);
        let mut stream = vec![0.0; 1000];
        stream.extend(encoder.encode(b"first frame").unwrap());
        stream.extend(encoder.encode(b"second frame").unwrap());
        stream.extend(vec![0.0; 4096]);

        receiver.start_receive();
        for block in stream.chunks(512) {
            tap.deliver(block);
        }

        let payloads: Vec<_> = drain(&receiver)
            .into_iter()
            .filter_map(|event| match event {
                ReceiveEvent::DataAvailable { payload, crc_ok } => {
                    assert!(crc_ok);
                    Some(payload)
                }
                ReceiveEvent::PacketDetected { .. } => None,
            })
            .collect();
        assert_eq!(payloads, vec![b"first frame".to_vec(), b"second frame".to_vec()]);
    }

    #[test]
    fn test_corrupted_frame_is_flagged() {
        let (context, receiver, _) = setup();
        let mut samples = FrameEncoder::new(&context).encode(&[0x33; 20]).unwrap();
        // invert a stretch of data symbols
        let start = context.config().preamble_samples() + 60 * 3;
        for s in &mut samples[start..start + 9] {
            *s = -*s;
        }
        samples.extend(vec![0.0; 4096]);

        receiver.start_receive();
        receiver.push_samples(&samples);
        let events = drain(&receiver);
        assert!(matches!(events[0], ReceiveEvent::PacketDetected { .. }));
        assert!(matches!(
            &events[1],
            ReceiveEvent::DataAvailable { crc_ok: false, payload } if payload.len() == 20
        ));
    }

    #[test]
    fn test_no_event_after_stop() {
        let (context, receiver, tap) = setup();
        receiver.start_receive();
        receiver.stop_receive();
        let mut samples = FrameEncoder::new(&context).encode(b"late").unwrap();
        samples.extend(vec![0.0; 4096]);
        assert!(!tap.deliver(&samples));
        receiver.push_samples(&samples);
        assert!(
            receiver
                .events()
                .recv_timeout(Duration::from_millis(50))
                .is_err()
        );
    }
}
