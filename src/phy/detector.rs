use std::sync::Arc;

use tracing::{debug, trace};

use crate::acoustic::similarity::{Correlator, next_fft_len};
use crate::config::LinkConfig;

/// Outcome of one streaming [`PreambleDetector::scan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Index of the last preamble sample in the scanned buffer
    Found(usize),
    /// No preamble yet. The first `consumed` samples will never start one
    /// and can be dropped before the next scan.
    NotFound { consumed: usize },
}

/// Acceptance test for one correlation lag.
///
/// `correlation` is normalized so that a clean copy of the preamble scores
/// the same as the local signal level: the RMS of the candidate window, or
/// the square root of the EMA power at its end when that is larger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerGate {
    pub floor: f32,
    pub min_ratio: f32,
    pub max_ratio: f32,
}

impl PowerGate {
    pub fn accepts(&self, correlation: f32, level: f32) -> bool {
        let correlation = correlation.abs();
        correlation > self.floor
            && correlation >= self.min_ratio * level
            && correlation <= self.max_ratio * level
    }
}

/// Chirp detector working on blocks of `preamble + window` samples.
///
/// Each block is correlated in the frequency domain. The first lag that
/// passes the [`PowerGate`] opens a peak search spanning half a preamble,
/// and the strongest lag in that span marks the preamble. When the span
/// runs past the block, the block slides to the candidate and is searched
/// again.
pub struct PreambleDetector {
    preamble_len: usize,
    /// RMS of the preamble
    reference_level: f32,
    correlator: Correlator,
    window: usize,
    gate: PowerGate,
    alpha: f32,
    /// EMA power just before the next scanned sample
    power: f32,
}

impl PreambleDetector {
    pub fn new(preamble: Arc<[f32]>, config: &LinkConfig) -> Self {
        let preamble_len = preamble.len();
        let window = config.detector_window.max(1);
        let energy: f32 = preamble.iter().map(|x| x * x).sum();
        let reference_level = (energy / preamble_len.max(1) as f32).sqrt();

        let fft_len = next_fft_len(preamble_len + window);
        debug!(
            "Preamble detector: {} sample preamble, window {}, FFT {}",
            preamble_len, window, fft_len
        );

        Self {
            preamble_len,
            reference_level,
            correlator: Correlator::new(&preamble, fft_len),
            window,
            gate: PowerGate {
                floor: config.detector_power_floor,
                min_ratio: config.detector_min_power_ratio,
                max_ratio: config.detector_max_power_ratio,
            },
            alpha: crate::utils::consts::POWER_EMA_ALPHA,
            power: 0.0,
        }
    }

    /// Samples a streaming scan needs before it correlates anything
    pub fn block_len(&self) -> usize {
        self.preamble_len + self.window
    }

    pub fn reset(&mut self) {
        self.power = 0.0;
    }

    /// Search a complete recording. Peaks at the very end of the buffer are
    /// accepted even when the peak search span is cut short.
    pub fn detect(&mut self, samples: &[f32]) -> Option<usize> {
        self.reset();
        match self.search(samples, true) {
            Detection::Found(position) => Some(position),
            Detection::NotFound { .. } => None,
        }
    }

    /// Search a live buffer. Only whole blocks are examined; the caller
    /// drops `consumed` samples on [`Detection::NotFound`] and scans again
    /// once more samples are appended. The EMA power carries over.
    pub fn scan(&mut self, samples: &[f32]) -> Detection {
        self.search(samples, false)
    }

    fn search(&mut self, samples: &[f32], end_of_stream: bool) -> Detection {
        let n = self.preamble_len;
        let full = self.block_len();
        if n == 0 || samples.len() < n || (!end_of_stream && samples.len() < full) {
            return Detection::NotFound { consumed: 0 };
        }

        let powers = self.local_power(samples);
        let energy = cumulative_energy(samples);
        let scale = n as f32 * self.reference_level.max(f32::EPSILON);
        let guard = n / 2;
        let mut start = 0;

        loop {
            let remaining = samples.len() - start;
            let tail = remaining < full;
            if remaining < n || (tail && !end_of_stream) {
                if start > 0 {
                    self.power = powers[start - 1];
                }
                return Detection::NotFound { consumed: start };
            }

            let block = &samples[start..start + remaining.min(full)];
            let at_end = start + block.len() == samples.len();
            let correlation: Vec<f32> = self
                .correlator
                .correlate(block)
                .into_iter()
                .map(|c| c / scale)
                .collect();
            let valid_max = block.len() - n;

            let first = (0..=valid_max).find(|&m| {
                let from = start + m;
                let window_power = ((energy[from + n] - energy[from]) / n as f64) as f32;
                let level = powers[from + n - 1].max(window_power).sqrt();
                self.gate.accepts(correlation[m], level)
            });
            let Some(m0) = first else {
                start += self.window.min(valid_max + 1);
                continue;
            };

            if m0 + guard > valid_max && m0 > 0 && !(at_end && end_of_stream) {
                trace!("Candidate at {} near block edge, sliding", start + m0);
                start += m0;
                continue;
            }

            let end = (m0 + guard).min(valid_max);
            let peak = (m0..=end)
                .max_by(|&a, &b| correlation[a].abs().total_cmp(&correlation[b].abs()))
                .unwrap_or(m0);
            let position = start + peak + n - 1;
            debug!(
                "Preamble ends at {} (corr={:.3}, level={:.3})",
                position,
                correlation[peak],
                powers[position].sqrt()
            );
            return Detection::Found(position);
        }
    }

    /// EMA power after each sample, seeded from the previous scan. It lags
    /// behind the signal, so the gate also checks the window's own power.
    fn local_power(&self, samples: &[f32]) -> Vec<f32> {
        let mut power = self.power;
        samples
            .iter()
            .map(|&x| {
                power += self.alpha * (x * x - power);
                power
            })
            .collect()
    }
}

/// `energy[i]` is the sum of squares of the first `i` samples
fn cumulative_energy(samples: &[f32]) -> Vec<f64> {
    let mut total = 0.0f64;
    std::iter::once(0.0)
        .chain(samples.iter().map(|&x| {
            total += (x as f64) * (x as f64);
            total
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acoustic::PreambleBuilder;
    use crate::phy::Modulator;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn detector() -> (PreambleDetector, Arc<[f32]>) {
        let config = LinkConfig::default();
        let preamble = PreambleBuilder::new(
            config.preamble_frequency_min,
            config.preamble_frequency_max,
        )
        .build(config.sample_rate, config.preamble_duration());
        (PreambleDetector::new(preamble.clone(), &config), preamble)
    }

    fn noise(rng: &mut StdRng, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|_| rng.random_range(-amplitude..amplitude))
            .collect()
    }

    #[test]
    fn test_gate() {
        let gate = PowerGate {
            floor: 0.05,
            min_ratio: 0.5,
            max_ratio: 3.0,
        };
        assert!(gate.accepts(0.5, 0.5));
        assert!(gate.accepts(-0.5, 0.5));
        // below the floor
        assert!(!gate.accepts(0.04, 0.04));
        // weak against the local level
        assert!(!gate.accepts(0.2, 0.5));
        // spike: far above the local level
        assert!(!gate.accepts(1.0, 0.2));
    }

    #[test]
    fn test_silence_and_noise_are_ignored() {
        let (mut detector, _) = detector();
        assert_eq!(detector.detect(&vec![0.0; 10_000]), None);

        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(detector.detect(&noise(&mut rng, 10_000, 0.3)), None);
    }

    #[test]
    fn test_modulated_data_without_preamble_is_ignored() {
        let config = LinkConfig::default();
        let (mut detector, _) = detector();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let bytes: Vec<u8> = (0..200).map(|_| rng.random()).collect();
            let mut samples = vec![0.0; 1000];
            samples.extend(Modulator::new(&config).modulate(&bytes));
            samples.extend(vec![0.0; 3000]);
            assert_eq!(detector.detect(&samples), None);
        }
    }

    #[test]
    fn test_short_burst_is_ignored() {
        let (mut detector, _) = detector();
        // clipped 8 kHz square wave, 100 samples
        let mut samples = vec![0.0; 3000];
        samples.extend((0..100).map(|i| if (i / 3) % 2 == 0 { 1.0 } else { -1.0 }));
        samples.extend(vec![0.0; 3000]);
        assert_eq!(detector.detect(&samples), None);
    }

    #[test]
    fn test_short_buffer() {
        let (mut detector, preamble) = detector();
        assert_eq!(detector.detect(&preamble[..100]), None);
        assert_eq!(
            detector.scan(&preamble),
            Detection::NotFound { consumed: 0 }
        );
    }

    #[test]
    fn test_finds_preamble_in_noise() {
        let (mut detector, preamble) = detector();
        let mut rng = StdRng::seed_from_u64(42);
        let mut samples = noise(&mut rng, 3000, 0.02);
        samples.extend(preamble.iter().map(|x| x * 0.5));
        samples.extend(noise(&mut rng, 3000, 0.02));
        assert_eq!(detector.detect(&samples), Some(3000 + preamble.len() - 1));
    }

    #[test]
    fn test_streaming_matches_whole_buffer() {
        let (mut detector, preamble) = detector();
        let mut rng = StdRng::seed_from_u64(3);
        let mut samples = noise(&mut rng, 7000, 0.01);
        samples.extend(preamble.iter());
        samples.extend(noise(&mut rng, 4000, 0.01));
        let expected = 7000 + preamble.len() - 1;

        let mut buffer = Vec::new();
        let mut dropped = 0;
        let mut found = None;
        for chunk in samples.chunks(256) {
            buffer.extend_from_slice(chunk);
            match detector.scan(&buffer) {
                Detection::Found(position) => {
                    found = Some(dropped + position);
                    break;
                }
                Detection::NotFound { consumed } => {
                    buffer.drain(..consumed);
                    dropped += consumed;
                }
            }
        }
        assert_eq!(found, Some(expected));
    }
}
