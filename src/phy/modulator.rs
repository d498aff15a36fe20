use serde::{Deserialize, Serialize};
use tracing::trace;

use super::crc::bytes_to_bits;
use crate::acoustic::CarrierGenerator;
use crate::config::LinkConfig;

/// How bits map onto carrier polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolStrategy {
    /// `0` → +carrier, `1` → −carrier
    Binary,
    /// A reference symbol first; every `1` flips the polarity of the
    /// previous symbol, every `0` repeats it
    Differential,
}

impl SymbolStrategy {
    /// Symbols sent ahead of the first data bit
    pub fn reference_symbols(self) -> usize {
        match self {
            SymbolStrategy::Binary => 0,
            SymbolStrategy::Differential => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn sign(self) -> f32 {
        match self {
            Polarity::Positive => 1.0,
            Polarity::Negative => -1.0,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Polarity::Positive => Polarity::Negative,
            Polarity::Negative => Polarity::Positive,
        }
    }
}

pub struct Modulator {
    carrier: CarrierGenerator,
    bit_depth: usize,
    strategy: SymbolStrategy,
    reference: Polarity,
}

impl Modulator {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            carrier: CarrierGenerator::new(
                config.sample_rate,
                config.carrier_frequency,
                config.gain,
            ),
            bit_depth: config.bit_depth,
            strategy: config.symbol_strategy,
            reference: Polarity::Positive,
        }
    }

    /// Polarity of the differential reference symbol
    pub fn with_reference(mut self, reference: Polarity) -> Self {
        self.reference = reference;
        self
    }

    pub fn samples_for(&self, bytes: usize) -> usize {
        (bytes * 8 + self.strategy.reference_symbols()) * self.bit_depth
    }

    /// Modulate `bytes` LSB first. The carrier restarts at index 0, so the
    /// receiver regenerates the same reference from the first data sample.
    pub fn modulate(&mut self, bytes: &[u8]) -> Vec<f32> {
        let bits = bytes_to_bits(bytes);
        let mut output = vec![0.0; self.samples_for(bytes.len())];
        self.carrier.reset(0.0);

        let polarities: Vec<Polarity> = match self.strategy {
            SymbolStrategy::Binary => bits
                .iter()
                .map(|&bit| {
                    if bit == 1 {
                        Polarity::Negative
                    } else {
                        Polarity::Positive
                    }
                })
                .collect(),
            SymbolStrategy::Differential => {
                let mut current = self.reference;
                let mut symbols = Vec::with_capacity(bits.len() + 1);
                symbols.push(current);
                for &bit in &bits {
                    if bit == 1 {
                        current = current.flipped();
                    }
                    symbols.push(current);
                }
                symbols
            }
        };

        for (i, polarity) in polarities.iter().enumerate() {
            let start = i * self.bit_depth;
            self.carrier
                .read(&mut output, start, self.bit_depth);
            let sign = polarity.sign();
            for sample in &mut output[start..start + self.bit_depth] {
                *sample *= sign;
            }
        }

        trace!(
            "Modulated {} bytes into {} samples ({:?})",
            bytes.len(),
            output.len(),
            self.strategy
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_length() {
        let config = LinkConfig::default();
        let mut modulator = Modulator::new(&config);
        let payload: Vec<u8> = (0..100).collect();
        assert_eq!(modulator.modulate(&payload).len(), (8 * 100 + 1) * 3);

        let binary = LinkConfig {
            symbol_strategy: SymbolStrategy::Binary,
            ..LinkConfig::default()
        };
        assert_eq!(Modulator::new(&binary).modulate(&payload).len(), 8 * 100 * 3);
    }

    #[test]
    fn test_one_bits_flip_polarity() {
        let config = LinkConfig {
            bit_depth: 6,
            carrier_frequency: 4000.0,
            gain: 1.0,
            ..LinkConfig::default()
        };
        let mut modulator = Modulator::new(&config);
        // 0b01: first data bit flips, the rest repeat
        let samples = modulator.modulate(&[0b0000_0001]);
        let mut carrier = CarrierGenerator::new(48000, 4000.0, 1.0);
        let mut reference = vec![0.0; samples.len()];
        carrier.read(&mut reference, 0, samples.len());

        let symbol_sign = |k: usize| -> f32 {
            let window = k * 6..(k + 1) * 6;
            samples[window.clone()]
                .iter()
                .zip(&reference[window])
                .map(|(a, b)| a * b)
                .sum::<f32>()
                .signum()
        };
        assert_eq!(symbol_sign(0), 1.0);
        assert_eq!(symbol_sign(1), -1.0);
        for k in 2..9 {
            assert_eq!(symbol_sign(k), -1.0);
        }
    }

    #[test]
    fn test_reference_polarity_inverts_everything() {
        let config = LinkConfig::default();
        let positive = Modulator::new(&config).modulate(b"dpsk");
        let negative = Modulator::new(&config)
            .with_reference(Polarity::Negative)
            .modulate(b"dpsk");
        for (a, b) in positive.iter().zip(negative.iter()) {
            assert!((a + b).abs() < 1e-6);
        }
    }
}
