use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::utils::lock;

/// Up/down chirp synchronization waveform.
///
/// The instantaneous frequency climbs linearly from `frequency_min` to
/// `frequency_max` over the first half and falls back over the second half.
/// Waveforms are cached per `(sample_rate, duration)`, so transmit and
/// receive sides share one allocation.
pub struct PreambleBuilder {
    frequency_min: f32,
    frequency_max: f32,
    cache: Mutex<HashMap<(u32, Duration), Arc<[f32]>>>,
}

impl PreambleBuilder {
    pub fn new(frequency_min: f32, frequency_max: f32) -> Self {
        Self {
            frequency_min,
            frequency_max,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn build(&self, sample_rate: u32, duration: Duration) -> Arc<[f32]> {
        let mut cache = lock(&self.cache);
        cache
            .entry((sample_rate, duration))
            .or_insert_with(|| {
                let samples = create_preamble(
                    self.frequency_min,
                    self.frequency_max,
                    sample_rate,
                    duration,
                );
                debug!(
                    "Built preamble: {} samples, {}..{} Hz",
                    samples.len(),
                    self.frequency_min,
                    self.frequency_max
                );
                samples.into()
            })
            .clone()
    }
}

fn chirp_phase(t: f64, half: f64, fmin: f64, fmax: f64) -> f64 {
    let sweep = (fmax - fmin) / half;
    if t <= half {
        2.0 * PI * (fmin * t + sweep * t * t / 2.0)
    } else {
        let tau = t - half;
        let at_peak = fmin * half + sweep * half * half / 2.0;
        2.0 * PI * (at_peak + fmax * tau - sweep * tau * tau / 2.0)
    }
}

pub fn create_preamble(
    f_min: f32,
    f_max: f32,
    sample_rate: u32,
    duration: Duration,
) -> Vec<f32> {
    let samples =
        (sample_rate as f64 * duration.as_secs_f64()).round() as usize;
    let half = samples as f64 / sample_rate as f64 / 2.0;
    (0..samples)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            chirp_phase(t, half, f_min as f64, f_max as f64).sin() as f32
        })
        .collect()
}
