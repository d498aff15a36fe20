use std::iter::repeat;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

fn pad_signal(signal: &[f32], size: usize) -> Vec<Complex<f32>> {
    let mut padded: Vec<Complex<f32>> = signal
        .iter()
        .map(|&x| Complex::new(x, 0.0))
        .collect();
    padded.extend(repeat(Complex::new(0.0, 0.0)).take(size - signal.len()));
    padded
}

/// FFT cross-correlation against a fixed reference.
///
/// The reference spectrum and both FFT plans are computed once; every call
/// to [`Correlator::correlate`] costs one forward and one inverse transform of
/// `fft_len` points.
pub struct Correlator {
    fft_len: usize,
    reference_len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    reference_spectrum: Vec<Complex<f32>>,
}

impl Correlator {
    pub fn new(reference: &[f32], fft_len: usize) -> Self {
        assert!(fft_len >= reference.len(), "FFT shorter than reference");

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_len);
        let inverse = planner.plan_fft_inverse(fft_len);

        let mut reference_spectrum = pad_signal(reference, fft_len);
        forward.process(&mut reference_spectrum);
        for bin in reference_spectrum.iter_mut() {
            *bin = bin.conj();
        }

        Self {
            fft_len,
            reference_len: reference.len(),
            forward,
            inverse,
            reference_spectrum,
        }
    }

    pub fn fft_len(&self) -> usize {
        self.fft_len
    }

    /// `r[m] = Σ_j block[m + j] · reference[j]` for every lag where the
    /// reference lies entirely inside `block` (`m <= block.len() - reference_len`).
    /// Shorter blocks are zero padded to the FFT size.
    pub fn correlate(&self, block: &[f32]) -> Vec<f32> {
        if block.len() < self.reference_len || block.len() > self.fft_len {
            return Vec::new();
        }

        let mut spectrum = pad_signal(block, self.fft_len);
        self.forward.process(&mut spectrum);
        for (bin, reference) in spectrum
            .iter_mut()
            .zip(self.reference_spectrum.iter())
        {
            *bin = *bin * *reference;
        }
        self.inverse.process(&mut spectrum);

        let scale = self.fft_len as f32;
        spectrum[..=block.len() - self.reference_len]
            .iter()
            .map(|c| c.re / scale)
            .collect()
    }
}

pub fn next_fft_len(min_len: usize) -> usize {
    min_len.next_power_of_two()
}
