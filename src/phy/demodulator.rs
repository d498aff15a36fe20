use tracing::{debug, trace, warn};

use super::frame::LengthPrefix;
use super::modulator::SymbolStrategy;
use crate::acoustic::CarrierGenerator;
use crate::config::LinkConfig;
use crate::utils::consts::CRC_BYTES;

/// Samples kept ahead of the first data sample so that negative tracking
/// offsets stay addressable.
pub const FRAME_LEAD: usize = 2;

/// Carrier samples generated per cache refill
const CARRIER_CACHE_SAMPLES: usize = 1024;

/// How the end of a frame is recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Big-endian length prefix counting payload + CRC bytes
    LengthPrefixed(LengthPrefix),
    /// Exactly this many bytes
    Fixed(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemodStatus {
    /// More samples are needed
    Pending,
    /// Every byte of the frame, prefix and CRC included
    Complete(Vec<u8>),
    /// The length prefix declared an impossible size
    Invalid { declared: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Decoding,
    Complete,
    Invalid { declared: usize },
}

/// Incremental DPSK / binary PSK demodulator with timing tracking.
///
/// Samples are appended as they arrive; bytes are decoded lazily through
/// [`Demodulator::decoded_bytes`] or [`Demodulator::poll`]. Each symbol is
/// correlated with a locally regenerated carrier at a few candidate sample
/// offsets, and the winning offset becomes the new tracking offset, which
/// absorbs clock drift between the two sound cards.
pub struct Demodulator {
    bit_depth: usize,
    strategy: SymbolStrategy,
    max_frame_bytes: usize,

    carrier: CarrierGenerator,
    carrier_cache: Vec<f32>,
    cache_start: usize,

    framing: Framing,
    samples: Vec<f32>,
    origin: usize,
    offset: isize,
    n_symbol: usize,
    previous_positive: bool,
    partial_byte: u8,
    bits_in_byte: u32,
    bytes: Vec<u8>,
    expected_bytes: Option<usize>,
    state: FrameState,
}

impl Demodulator {
    pub fn new(config: &LinkConfig) -> Self {
        let mut demodulator = Self {
            bit_depth: config.bit_depth,
            strategy: config.symbol_strategy,
            max_frame_bytes: config.max_frame_bytes,
            carrier: CarrierGenerator::new(
                config.sample_rate,
                config.carrier_frequency,
                1.0,
            ),
            carrier_cache: Vec::new(),
            cache_start: 0,
            framing: Framing::LengthPrefixed(config.length_prefix),
            samples: Vec::new(),
            origin: 0,
            offset: 0,
            n_symbol: 0,
            previous_positive: true,
            partial_byte: 0,
            bits_in_byte: 0,
            bytes: Vec::new(),
            expected_bytes: None,
            state: FrameState::Decoding,
        };
        demodulator.start_frame(
            Framing::LengthPrefixed(config.length_prefix),
            &[],
            0,
        );
        demodulator
    }

    /// Begin a new frame whose first data sample is `samples[data_start]`.
    pub fn start_frame(
        &mut self,
        framing: Framing,
        samples: &[f32],
        data_start: usize,
    ) {
        let lead = FRAME_LEAD.min(data_start);
        self.samples.clear();
        self.samples
            .extend_from_slice(&samples[data_start - lead..]);
        self.origin = lead;
        self.framing = framing;
        self.offset = 0;
        self.n_symbol = 0;
        self.previous_positive = true;
        self.partial_byte = 0;
        self.bits_in_byte = 0;
        self.bytes.clear();
        self.state = FrameState::Decoding;
        self.expected_bytes = match framing {
            Framing::Fixed(n) => Some(n),
            Framing::LengthPrefixed(_) => None,
        };
        if self.expected_bytes == Some(0) {
            self.state = FrameState::Complete;
        }

        self.carrier.reset(0.0);
        self.cache_start = 0;
        self.refill_carrier(0);
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        self.samples.extend_from_slice(samples);
    }

    /// Lazily decode bytes from the samples buffered so far. The iterator
    /// ends when more samples are needed or the frame is finished.
    pub fn decoded_bytes(&mut self) -> DecodedBytes<'_> {
        DecodedBytes { demodulator: self }
    }

    pub fn poll(&mut self) -> DemodStatus {
        while self.next_byte().is_some() {}
        match self.state {
            FrameState::Decoding => DemodStatus::Pending,
            FrameState::Complete => DemodStatus::Complete(self.bytes.clone()),
            FrameState::Invalid { declared } => DemodStatus::Invalid { declared },
        }
    }

    /// Decode a whole, already captured signal that starts with the first
    /// data sample. Zero padding supplies the look-ahead of the last symbol.
    pub fn demodulate(&mut self, samples: &[f32], framing: Framing) -> Vec<u8> {
        let mut padded =
            Vec::with_capacity(FRAME_LEAD + samples.len() + self.bit_depth + 4);
        padded.resize(FRAME_LEAD, 0.0);
        padded.extend_from_slice(samples);
        padded.resize(padded.len() + self.bit_depth + 4, 0.0);

        self.start_frame(framing, &padded, FRAME_LEAD);
        self.decoded_bytes().collect()
    }

    pub fn is_finished(&self) -> bool {
        self.state != FrameState::Decoding
    }

    /// Current timing correction in samples
    pub fn tracking_offset(&self) -> isize {
        self.offset
    }

    /// Samples past the last decided symbol
    pub fn remaining_samples(&self) -> &[f32] {
        &self.samples[self.cursor()..]
    }

    /// How far the decided symbols reach past the first data sample
    pub fn consumed_samples(&self) -> usize {
        self.cursor().saturating_sub(self.origin)
    }

    fn cursor(&self) -> usize {
        let cursor = self.origin as isize
            + (self.n_symbol * self.bit_depth) as isize
            + self.offset;
        cursor.clamp(0, self.samples.len() as isize) as usize
    }

    /// Everything from the first data sample on
    pub fn frame_samples(&self) -> &[f32] {
        &self.samples[self.origin..]
    }

    fn next_byte(&mut self) -> Option<u8> {
        loop {
            if self.state != FrameState::Decoding {
                return None;
            }
            let sum = self.decide_symbol()?;
            let positive = sum > 0.0;

            let bit = match self.strategy {
                SymbolStrategy::Binary => !positive,
                SymbolStrategy::Differential => {
                    if self.n_symbol == 1 {
                        // reference symbol
                        self.previous_positive = positive;
                        continue;
                    }
                    let bit = positive != self.previous_positive;
                    self.previous_positive = positive;
                    bit
                }
            };

            self.partial_byte |= (bit as u8) << self.bits_in_byte;
            self.bits_in_byte += 1;
            if self.bits_in_byte == 8 {
                let byte = self.partial_byte;
                self.partial_byte = 0;
                self.bits_in_byte = 0;
                self.bytes.push(byte);
                self.update_frame_state();
                return Some(byte);
            }
        }
    }

    fn update_frame_state(&mut self) {
        if let Framing::LengthPrefixed(prefix) = self.framing {
            if self.expected_bytes.is_none() && self.bytes.len() == prefix.size()
            {
                let declared = prefix.read(&self.bytes);
                if declared < CRC_BYTES || declared > self.max_frame_bytes {
                    warn!(
                        "Invalid length prefix {} (allowed {}..={})",
                        declared, CRC_BYTES, self.max_frame_bytes
                    );
                    self.state = FrameState::Invalid { declared };
                    return;
                }
                trace!("Frame declares {} bytes after the prefix", declared);
                self.expected_bytes = Some(prefix.size() + declared);
            }
        }

        if let Some(expected) = self.expected_bytes {
            if self.bytes.len() >= expected {
                debug!(
                    "Frame complete: {} bytes, tracking offset {}",
                    self.bytes.len(),
                    self.offset
                );
                self.state = FrameState::Complete;
            }
        }
    }

    /// Correlate the next symbol, update the tracking offset and return the
    /// winning correlation sum, or `None` until enough samples are buffered.
    fn decide_symbol(&mut self) -> Option<f32> {
        let first = self.n_symbol == 0;
        // wide search to lock the initial timing, narrow tracking afterwards
        let (candidates, probe): (&[isize], isize) = if first {
            (&[0, 1, 2], 2)
        } else {
            (&[0, -1, 1], 1)
        };

        let depth = self.bit_depth as isize;
        let nominal = self.n_symbol * self.bit_depth;
        let base = self.origin as isize + nominal as isize + self.offset;
        if (self.samples.len() as isize) < base + depth + probe + 2 {
            return None;
        }

        if nominal + self.bit_depth > self.cache_start + self.carrier_cache.len() {
            self.refill_carrier(nominal);
        }
        let reference = &self.carrier_cache[nominal - self.cache_start..]
            [..self.bit_depth];

        let mut best: Option<(isize, f32)> = None;
        for &delta in candidates {
            let start = base + delta;
            if start < 0 {
                continue;
            }
            let start = start as usize;
            let sum: f32 = self.samples[start..start + self.bit_depth]
                .iter()
                .zip(reference)
                .map(|(s, c)| s * c)
                .sum();
            best = match best {
                None => Some((delta, sum)),
                // larger magnitude with a consistent sign wins
                Some((_, current))
                    if sum.abs() > current.abs()
                        && (current == 0.0 || sum.signum() == current.signum()) =>
                {
                    Some((delta, sum))
                }
                keep => keep,
            };
        }

        let (delta, sum) = best.unwrap_or((0, 0.0));
        if delta != 0 {
            trace!(
                "Symbol {}: tracking offset {} -> {}",
                self.n_symbol,
                self.offset,
                self.offset + delta
            );
        }
        self.offset += delta;
        self.n_symbol += 1;
        Some(sum)
    }

    /// Regenerate the carrier cache starting at nominal sample `from`. The
    /// generator runs ahead of the symbol being decoded, so rewind it first.
    fn refill_carrier(&mut self, from: usize) {
        let position = self.carrier.sample_index();
        self.carrier
            .seek_back(position.saturating_sub(from as u64));
        self.cache_start = self.carrier.sample_index() as usize;

        let len = CARRIER_CACHE_SAMPLES.max(self.bit_depth);
        self.carrier_cache.resize(len, 0.0);
        self.carrier
            .read(&mut self.carrier_cache, 0, len);
    }
}

pub struct DecodedBytes<'a> {
    demodulator: &'a mut Demodulator,
}

impl Iterator for DecodedBytes<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.demodulator.next_byte()
    }
}
