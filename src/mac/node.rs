use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, Sender, TrySendError, bounded, select};
use tracing::{debug, error, info, trace, warn};

use super::backoff::BackoffHandler;
use super::frame::MacFrame;
use super::MacFrameType;
use crate::audio::AudioPort;
use crate::config::LinkConfig;
use crate::context::LinkContext;
use crate::error::{LinkError, Result};
use crate::phy::{ReceiveEvent, Receiver, TransmitEvent, Transmitter};
use crate::utils::consts::{CHANNEL_CAPACITY, DUPLICATE_WINDOW_FACTOR};
use crate::utils::lock;

#[derive(Debug)]
pub enum MacEvent {
    DataAvailable { src: u8, payload: Vec<u8> },
    AckReceived { src: u8 },
    /// An inbound frame could not be handled
    DispatchFailed(LinkError),
}

/// Single-slot mailbox for the most recent Ack
struct AckSlot {
    ack: Mutex<Option<(u8, Vec<u8>)>>,
    arrived: Condvar,
}

impl AckSlot {
    fn new() -> Self {
        Self {
            ack: Mutex::new(None),
            arrived: Condvar::new(),
        }
    }

    fn clear(&self) {
        lock(&self.ack).take();
    }

    fn put(&self, src: u8, payload: Vec<u8>) {
        *lock(&self.ack) = Some((src, payload));
        self.arrived.notify_all();
    }

    /// Wait until an Ack from `src` carrying `payload` shows up
    fn wait_for(&self, src: u8, payload: &[u8], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.ack);
        loop {
            if let Some((from, echoed)) = slot.take() {
                if from == src && echoed == payload {
                    return true;
                }
                debug!("Ignoring unrelated ack from {}", from);
                continue;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            slot = self
                .arrived
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Inbound side of the MAC: everything the dispatcher thread does with a
/// decoded frame.
struct Dispatcher {
    address: u8,
    config: LinkConfig,
    transmitter: Arc<Transmitter>,
    acks: Arc<AckSlot>,
    events: Sender<MacEvent>,
    last_delivered: Option<(u8, Vec<u8>, Instant)>,
}

impl Dispatcher {
    fn handle_frame(&mut self, payload: Vec<u8>, crc_ok: bool) -> Result<()> {
        if !crc_ok {
            debug!("Dropping frame with bad CRC");
            return Ok(());
        }
        let frame = MacFrame::parse(payload)?;
        if frame.dest() != self.address {
            trace!("Frame for {} ignored by {}", frame.dest(), self.address);
            return Ok(());
        }

        match frame.frame_type()? {
            MacFrameType::Data => self.on_data(frame, false),
            MacFrameType::ReTrans => self.on_data(frame, true),
            MacFrameType::Ack => {
                self.on_ack(frame);
                Ok(())
            }
            other => Err(LinkError::Unsupported(other)),
        }
    }

    fn on_data(&mut self, frame: MacFrame, retransmitted: bool) -> Result<()> {
        let src = frame.src();
        if self.config.send_ack {
            let ack = MacFrame::new(src, self.address, MacFrameType::Ack, frame.payload());
            self.transmitter.add_payload(ack.as_bytes())?;
            trace!("Ack queued for {}", src);
        }

        if retransmitted && self.is_duplicate(src, frame.payload()) {
            debug!("Duplicate data from {} acknowledged again, not delivered", src);
            return Ok(());
        }
        self.last_delivered = Some((src, frame.payload().to_vec(), Instant::now()));

        info!("Received {} bytes from {}", frame.payload().len(), src);
        let payload = frame.payload().to_vec();
        self.emit(MacEvent::DataAvailable { src, payload });
        Ok(())
    }

    /// Whether a retransmitted frame repeats the one delivered last, which
    /// means our Ack was lost. First transmissions are always delivered.
    fn is_duplicate(&self, src: u8, payload: &[u8]) -> bool {
        if !self.config.suppress_duplicates {
            return false;
        }
        let window = self.config.ack_timeout() * DUPLICATE_WINDOW_FACTOR;
        matches!(
            &self.last_delivered,
            Some((from, delivered, at))
                if *from == src && delivered == payload && at.elapsed() < window
        )
    }

    fn on_ack(&mut self, frame: MacFrame) {
        if !self.config.ack_required {
            trace!("Unexpected ack from {}", frame.src());
            return;
        }
        let src = frame.src();
        debug!("Ack from {}", src);
        self.emit(MacEvent::AckReceived { src });
        self.acks.put(src, frame.payload().to_vec());
    }

    fn emit(&self, event: MacEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => {
                warn!("MAC event channel full, dropping {:?}", event)
            }
        }
    }
}

/// One addressed node: stop-and-wait transmission with acknowledgement,
/// retransmission and binary exponential backoff, plus a dispatcher
/// thread for inbound frames.
pub struct Mac {
    context: Arc<LinkContext>,
    address: u8,
    receiver: Receiver,
    transmitter: Arc<Transmitter>,
    acks: Arc<AckSlot>,
    dispatcher: Arc<Mutex<Dispatcher>>,
    backoff: Mutex<BackoffHandler>,
    events: channel::Receiver<MacEvent>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Mac {
    pub fn new(context: Arc<LinkContext>, address: u8, port: AudioPort) -> Self {
        let config = context.config().clone();
        let transmitter = Arc::new(Transmitter::new(
            &context,
            port.sink.clone(),
            config.mac_frame_bytes(),
        ));
        let receiver = Receiver::new(&context, port.source.clone());
        let acks = Arc::new(AckSlot::new());
        let (event_tx, event_rx) = bounded(CHANNEL_CAPACITY);

        let dispatcher = Arc::new(Mutex::new(Dispatcher {
            address,
            config: config.clone(),
            transmitter: transmitter.clone(),
            acks: acks.clone(),
            events: event_tx,
            last_delivered: None,
        }));

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let inbound = receiver.events();
        let mut played = Some(transmitter.events());
        let worker_dispatcher = dispatcher.clone();
        let worker = thread::spawn(move || {
            loop {
                let playback = played.clone().unwrap_or_else(channel::never);
                select! {
                    recv(inbound) -> event => match event {
                        Ok(ReceiveEvent::DataAvailable { payload, crc_ok }) => {
                            let mut dispatcher = lock(&worker_dispatcher);
                            if let Err(e) = dispatcher.handle_frame(payload, crc_ok) {
                                error!("Failed to dispatch frame: {}", e);
                                dispatcher.emit(MacEvent::DispatchFailed(e));
                            }
                        }
                        Ok(ReceiveEvent::PacketDetected { position }) => {
                            trace!("Packet at sample {}", position);
                        }
                        Err(_) => break,
                    },
                    recv(playback) -> event => match event {
                        Ok(TransmitEvent::PlayComplete) => trace!("Node {} idle", address),
                        Err(_) => played = None,
                    },
                    recv(shutdown_rx) -> _ => break,
                }
            }
            debug!("MAC dispatcher {} finished", address);
        });

        receiver.start_receive();
        info!("MAC node {} up", address);

        Self {
            backoff: Mutex::new(BackoffHandler::from_config(&config)),
            context,
            address,
            receiver,
            transmitter,
            acks,
            dispatcher,
            events: event_rx,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn events(&self) -> channel::Receiver<MacEvent> {
        self.events.clone()
    }

    /// Send one payload of exactly `payload_bytes` to `dest`. With acks
    /// required this blocks until the matching Ack arrives or the retries
    /// run out.
    pub fn add_data(&self, dest: u8, payload: &[u8]) -> Result<()> {
        let config = self.context.config();
        if payload.len() != config.payload_bytes {
            return Err(LinkError::LengthMismatch {
                expected: config.payload_bytes,
                actual: payload.len(),
            });
        }
        let frame = MacFrame::new(dest, self.address, MacFrameType::Data, payload);
        let retransmission = MacFrame::new(dest, self.address, MacFrameType::ReTrans, payload);

        // one outstanding frame per node
        let mut backoff = lock(&self.backoff);
        if !config.ack_required {
            return self.transmitter.add_payload(frame.as_bytes());
        }

        let ack_window = self.transmitter.airtime() + config.ack_timeout();
        let mut attempts = 0u32;
        loop {
            self.acks.clear();
            let outgoing = if attempts == 0 { &frame } else { &retransmission };
            self.transmitter.add_payload(outgoing.as_bytes())?;
            attempts += 1;

            if self.acks.wait_for(dest, payload, ack_window) {
                debug!("Delivered to {} after {} attempt(s)", dest, attempts);
                backoff.reset();
                return Ok(());
            }

            warn!("No ack from {} (attempt {})", dest, attempts);
            if config.max_retries.is_some_and(|max| attempts > max) {
                backoff.reset();
                return Err(LinkError::AckTimeout { dest, attempts });
            }
            let waited = backoff.wait();
            debug!("Retransmitting to {} after {:?}", dest, waited);
        }
    }

    /// Run one received physical payload through the inbound path
    pub fn handle_frame(&self, payload: Vec<u8>, crc_ok: bool) -> Result<()> {
        lock(&self.dispatcher).handle_frame(payload, crc_ok)
    }

    /// Stop receiving, stop the dispatcher and flush the transmitter
    pub fn shutdown(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        self.receiver.stop_receive();
        let _ = shutdown.send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("MAC dispatcher panicked");
            }
        }
        self.transmitter.complete();
        info!("MAC node {} down", self.address);
    }
}

impl Drop for Mac {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PlaybackQueue, SampleSink};

    const ME: u8 = 1;
    const PEER: u8 = 2;

    fn node(config: LinkConfig) -> (Mac, Arc<PlaybackQueue>) {
        let context = LinkContext::new(config).unwrap();
        let (port, _, queue) = AudioPort::detached();
        (Mac::new(context, ME, port), queue)
    }

    fn small_config() -> LinkConfig {
        LinkConfig {
            payload_bytes: 8,
            ..LinkConfig::default()
        }
    }

    fn wait_queued(queue: &PlaybackQueue) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        while queue.queued() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        queue.queued()
    }

    #[test]
    fn test_data_is_acked_and_delivered() {
        let (mac, queue) = node(small_config());
        let events = mac.events();
        let frame = MacFrame::new(ME, PEER, MacFrameType::Data, &[5; 8]);
        mac.handle_frame(frame.into_bytes(), true).unwrap();

        match events.try_recv() {
            Ok(MacEvent::DataAvailable { src, payload }) => {
                assert_eq!(src, PEER);
                assert_eq!(payload, vec![5; 8]);
            }
            other => panic!("unexpected {:?}", other),
        }
        // the ack went to the transmitter
        assert!(wait_queued(&queue) > 0);
    }

    #[test]
    fn test_filters() {
        let (mac, queue) = node(small_config());
        let events = mac.events();

        let bad_crc = MacFrame::new(ME, PEER, MacFrameType::Data, &[1; 8]);
        mac.handle_frame(bad_crc.into_bytes(), false).unwrap();
        let elsewhere = MacFrame::new(7, PEER, MacFrameType::Data, &[1; 8]);
        mac.handle_frame(elsewhere.into_bytes(), true).unwrap();

        assert!(events.try_recv().is_err());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.queued(), 0);
    }

    #[test]
    fn test_repeated_payloads_are_all_delivered() {
        let (mac, _) = node(small_config());
        let events = mac.events();
        let frame = MacFrame::new(ME, PEER, MacFrameType::Data, &[3; 8]);
        mac.handle_frame(frame.clone().into_bytes(), true).unwrap();
        mac.handle_frame(frame.into_bytes(), true).unwrap();
        assert_eq!(events.try_iter().count(), 2);
    }

    #[test]
    fn test_retransmitted_duplicates_are_acked_but_not_delivered() {
        let (mac, queue) = node(small_config());
        let events = mac.events();
        let first = MacFrame::new(ME, PEER, MacFrameType::Data, &[3; 8]);
        let again = MacFrame::new(ME, PEER, MacFrameType::ReTrans, &[3; 8]);
        mac.handle_frame(first.into_bytes(), true).unwrap();
        mac.handle_frame(again.into_bytes(), true).unwrap();
        assert_eq!(events.try_iter().count(), 1);

        // both were acknowledged
        let context = LinkContext::new(small_config()).unwrap();
        let frame = context.frame_samples(context.config().mac_frame_bytes());
        let deadline = Instant::now() + Duration::from_secs(2);
        while queue.queued() < 2 * frame && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(queue.queued(), 2 * frame);

        // a retransmission whose first copy was never seen
        let unseen = MacFrame::new(ME, PEER, MacFrameType::ReTrans, &[4; 8]);
        mac.handle_frame(unseen.into_bytes(), true).unwrap();
        assert!(matches!(
            events.try_recv(),
            Ok(MacEvent::DataAvailable { src: PEER, .. })
        ));
    }

    #[test]
    fn test_duplicate_suppression_can_be_disabled() {
        let no_suppression = LinkConfig {
            suppress_duplicates: false,
            ..small_config()
        };
        let (mac, _) = node(no_suppression);
        let events = mac.events();
        let first = MacFrame::new(ME, PEER, MacFrameType::Data, &[3; 8]);
        let again = MacFrame::new(ME, PEER, MacFrameType::ReTrans, &[3; 8]);
        mac.handle_frame(first.into_bytes(), true).unwrap();
        mac.handle_frame(again.into_bytes(), true).unwrap();
        assert_eq!(events.try_iter().count(), 2);
    }

    #[test]
    fn test_playback_events_do_not_pile_up() {
        let (mac, queue) = node(small_config());
        let events = mac.events();
        let mut block = vec![0.0; 4096];
        for i in 0..(CHANNEL_CAPACITY + 6) {
            let frame = MacFrame::new(ME, PEER, MacFrameType::Data, &[i as u8; 8]);
            mac.handle_frame(frame.into_bytes(), true).unwrap();
            events.try_iter().for_each(drop);
            wait_queued(&queue);
            while queue.queued() > 0 {
                queue.fill(&mut block);
            }
        }

        let played = mac.transmitter.events();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !played.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(played.is_empty());
    }

    #[test]
    fn test_unsupported_and_unknown_types() {
        let (mac, _) = node(small_config());
        let ping = MacFrame::new(ME, PEER, MacFrameType::MacPingReq, &[0; 8]);
        assert!(matches!(
            mac.handle_frame(ping.into_bytes(), true),
            Err(LinkError::Unsupported(MacFrameType::MacPingReq))
        ));
        assert!(matches!(
            mac.handle_frame(vec![ME, PEER, 0x42, 0, 0], true),
            Err(LinkError::UnknownFrameType(0x42))
        ));
    }

    #[test]
    fn test_wrong_payload_size() {
        let (mac, _) = node(small_config());
        assert!(matches!(
            mac.add_data(PEER, &[0; 3]),
            Err(LinkError::LengthMismatch {
                expected: 8,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let config = LinkConfig {
            ack_timeout_ms: 5,
            max_retries: Some(2),
            backoff_scale_ms: 1,
            ..small_config()
        };
        let (mac, queue) = node(config.clone());
        let started = Instant::now();
        let result = mac.add_data(PEER, &[9; 8]);
        assert!(matches!(
            result,
            Err(LinkError::AckTimeout {
                dest: PEER,
                attempts: 3
            })
        ));
        // three frames were queued and nobody played them
        let context = LinkContext::new(config).unwrap();
        let frame = context.frame_samples(context.config().mac_frame_bytes());
        let deadline = Instant::now() + Duration::from_secs(2);
        while queue.queued() < 3 * frame && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(queue.queued(), 3 * frame);
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_ack_from_dispatcher_releases_sender() {
        let config = LinkConfig {
            ack_timeout_ms: 2000,
            ..small_config()
        };
        let (mac, _) = node(config);
        let mac = Arc::new(mac);

        let sender = mac.clone();
        let handle = thread::spawn(move || sender.add_data(PEER, &[4; 8]));
        thread::sleep(Duration::from_millis(50));
        let ack = MacFrame::new(ME, PEER, MacFrameType::Ack, &[4; 8]);
        mac.handle_frame(ack.into_bytes(), true).unwrap();

        assert!(handle.join().unwrap().is_ok());
        assert!(matches!(
            mac.events().try_recv(),
            Ok(MacEvent::AckReceived { src: PEER })
        ));
    }
}
