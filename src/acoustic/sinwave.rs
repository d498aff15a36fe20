use std::f64::consts::PI;

/// Phase-continuous sinusoid addressed by an integer sample counter.
///
/// The sample at index `i` is
/// `gain * sin(2π * frequency * i / sample_rate + phase_shift)`; the phase is
/// recomputed from the counter every sample so it never drifts across frames.
#[derive(Debug, Clone)]
pub struct CarrierGenerator {
    sample_rate: u32,
    frequency: f32,
    gain: f32,
    phase_shift: f32,
    sample_index: u64,
}

impl CarrierGenerator {
    pub fn new(sample_rate: u32, frequency: f32, gain: f32) -> Self {
        Self {
            sample_rate,
            frequency,
            gain,
            phase_shift: 0.0,
            sample_index: 0,
        }
    }

    /// Fill `buffer[offset..offset + count]` and advance the counter.
    pub fn read(
        &mut self,
        buffer: &mut [f32],
        offset: usize,
        count: usize,
    ) -> usize {
        let omega = 2.0 * PI * self.frequency as f64 / self.sample_rate as f64;
        for (i, sample) in buffer[offset..offset + count]
            .iter_mut()
            .enumerate()
        {
            let n = (self.sample_index + i as u64) as f64;
            *sample = self.gain
                * (omega * n + self.phase_shift as f64).sin() as f32;
        }
        self.sample_index += count as u64;
        count
    }

    pub fn seek_back(&mut self, samples: u64) {
        self.sample_index = self.sample_index.saturating_sub(samples);
    }

    pub fn reset(&mut self, phase_shift: f32) {
        self.sample_index = 0;
        self.phase_shift = phase_shift;
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn sample_index(&self) -> u64 {
        self.sample_index
    }
}
