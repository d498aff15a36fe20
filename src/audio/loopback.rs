use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::{AudioPort, CaptureTap, PlaybackQueue};
use crate::utils::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DropState {
    Idle,
    Armed,
    Dropping,
}

struct Medium {
    taps: Vec<Arc<CaptureTap>>,
    queues: Vec<Arc<PlaybackQueue>>,
    drops: Mutex<Vec<DropState>>,
    noise: Mutex<Option<(f32, StdRng)>>,
    block_size: usize,
}

impl Medium {
    fn step(&self) {
        let mut mix = vec![0.0f32; self.block_size];
        let mut block = vec![0.0f32; self.block_size];

        for (index, queue) in self.queues.iter().enumerate() {
            let played = queue.fill(&mut block);
            if self.swallow(index, played) {
                continue;
            }
            for (m, s) in mix.iter_mut().zip(&block) {
                *m += s;
            }
        }

        if let Some((amplitude, rng)) = lock(&self.noise).as_mut() {
            for m in mix.iter_mut() {
                *m += rng.random_range(-*amplitude..*amplitude);
            }
        }

        // every port hears every port, itself included
        for tap in &self.taps {
            tap.deliver(&mix);
        }
    }

    /// Whether this port's block is lost on the way
    fn swallow(&self, index: usize, played: usize) -> bool {
        let mut drops = lock(&self.drops);
        let state = &mut drops[index];
        match (*state, played > 0) {
            (DropState::Armed, true) => {
                debug!("Dropping burst from port {}", index);
                *state = DropState::Dropping;
                true
            }
            (DropState::Dropping, true) => true,
            (DropState::Dropping, false) => {
                *state = DropState::Idle;
                false
            }
            _ => false,
        }
    }
}

/// In-process acoustic medium: a driver thread plays every port's queue
/// one block per tick and feeds the sum back into every port's capture.
pub struct LoopbackMedium {
    medium: Arc<Medium>,
    tick: Duration,
    running: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackMedium {
    pub fn new(ports: usize, block_size: usize, tick: Duration) -> Self {
        let medium = Medium {
            taps: (0..ports).map(|_| Arc::new(CaptureTap::new())).collect(),
            queues: (0..ports).map(|_| Arc::new(PlaybackQueue::new())).collect(),
            drops: Mutex::new(vec![DropState::Idle; ports]),
            noise: Mutex::new(None),
            block_size: block_size.max(1),
        };
        Self {
            medium: Arc::new(medium),
            tick,
            running: Arc::new(AtomicBool::new(false)),
            driver: Mutex::new(None),
        }
    }

    /// Add uniform noise of the given amplitude to everything captured
    pub fn with_noise(self, amplitude: f32, seed: u64) -> Self {
        if amplitude > 0.0 {
            *lock(&self.medium.noise) = Some((amplitude, StdRng::seed_from_u64(seed)));
        }
        self
    }

    pub fn port(&self, index: usize) -> AudioPort {
        AudioPort::new(
            self.medium.taps[index].clone(),
            self.medium.queues[index].clone(),
        )
    }

    /// Silence the next contiguous burst played by `port`
    pub fn drop_next_burst(&self, port: usize) {
        lock(&self.medium.drops)[port] = DropState::Armed;
    }

    /// Advance the medium by one block
    pub fn step(&self) {
        self.medium.step();
    }

    pub fn start(&self) {
        let mut driver = lock(&self.driver);
        if driver.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let medium = self.medium.clone();
        let running = self.running.clone();
        let tick = self.tick;
        info!(
            "Loopback medium started: {} ports, {} samples every {:?}",
            medium.taps.len(),
            medium.block_size,
            tick
        );
        *driver = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                medium.step();
                thread::sleep(tick);
            }
        }));
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.driver).take() {
            let _ = handle.join();
            debug!("Loopback medium stopped");
        }
    }
}

impl Drop for LoopbackMedium {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleSink;

    fn capture(medium: &LoopbackMedium, port: usize) -> Arc<Mutex<Vec<f32>>> {
        let heard = Arc::new(Mutex::new(Vec::new()));
        let sink = heard.clone();
        medium.port(port).source.start(Box::new(move |samples| {
            lock(&sink).extend_from_slice(samples);
        }));
        heard
    }

    #[test]
    fn test_ports_hear_each_other_and_themselves() {
        let medium = LoopbackMedium::new(2, 4, Duration::from_millis(1));
        let heard_a = capture(&medium, 0);
        let heard_b = capture(&medium, 1);

        medium.port(0).sink.push(&[0.5, 0.5]);
        medium.port(1).sink.push(&[0.25]);
        medium.step();

        let expected = vec![0.75, 0.5, 0.0, 0.0];
        assert_eq!(*lock(&heard_a), expected);
        assert_eq!(*lock(&heard_b), expected);
    }

    #[test]
    fn test_drop_next_burst_only_drops_one() {
        let medium = LoopbackMedium::new(1, 4, Duration::from_millis(1));
        let heard = capture(&medium, 0);
        let sink = medium.port(0).sink;

        medium.drop_next_burst(0);
        sink.push(&[1.0; 6]);
        medium.step();
        medium.step();
        medium.step();
        assert!(lock(&heard).iter().all(|&s| s == 0.0));

        sink.push(&[1.0; 4]);
        medium.step();
        assert_eq!(&lock(&heard)[12..], &[1.0; 4]);
    }

    #[test]
    fn test_driver_thread_plays_queue() {
        let medium = LoopbackMedium::new(1, 64, Duration::from_millis(1));
        let heard = capture(&medium, 0);
        medium.port(0).sink.push(&[0.5; 100]);
        medium.start();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while medium.port(0).sink.queued() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        medium.stop();
        let heard = lock(&heard);
        assert_eq!(heard.iter().filter(|&&s| s == 0.5).count(), 100);
    }
}
