use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::phy::{LengthPrefix, SymbolStrategy};
use crate::utils::consts::*;

/// Everything a node needs to agree on with its peer, plus local
/// device and logging preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub sample_rate: u32,
    pub carrier_frequency: f32,
    pub gain: f32,
    /// Samples per symbol
    pub bit_depth: usize,
    pub symbol_strategy: SymbolStrategy,
    pub length_prefix: LengthPrefix,
    /// Fixed MAC payload size, known to both ends
    pub payload_bytes: usize,
    pub max_frame_bytes: usize,

    pub preamble_duration_ms: f32,
    pub preamble_frequency_min: f32,
    pub preamble_frequency_max: f32,

    pub detector_window: usize,
    pub detector_power_floor: f32,
    pub detector_min_power_ratio: f32,
    pub detector_max_power_ratio: f32,

    pub inter_frame_gap_ms: u32,

    pub ack_timeout_ms: u64,
    pub ack_required: bool,
    pub send_ack: bool,
    /// `None` retransmits until acknowledged
    pub max_retries: Option<u32>,
    pub backoff_scale_ms: u64,
    pub backoff_max_exponent: u32,
    pub suppress_duplicates: bool,

    /// JACK port to capture from; first physical port when unset
    pub input_port: Option<String>,
    /// JACK port to play into; first physical port when unset
    pub output_port: Option<String>,

    pub log_level: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            carrier_frequency: CARRIER_FREQUENCY,
            gain: CARRIER_GAIN,
            bit_depth: BIT_DEPTH,
            symbol_strategy: SymbolStrategy::Differential,
            length_prefix: LengthPrefix::TwoBytes,
            payload_bytes: PAYLOAD_BYTES,
            max_frame_bytes: MAX_FRAME_BYTES,
            preamble_duration_ms: PREAMBLE_DURATION_MS,
            preamble_frequency_min: PREAMBLE_FREQ_MIN,
            preamble_frequency_max: PREAMBLE_FREQ_MAX,
            detector_window: DETECTOR_WINDOW,
            detector_power_floor: DETECTOR_POWER_FLOOR,
            detector_min_power_ratio: DETECTOR_MIN_POWER_RATIO,
            detector_max_power_ratio: DETECTOR_MAX_POWER_RATIO,
            inter_frame_gap_ms: INTER_FRAME_GAP_MS,
            ack_timeout_ms: ACK_TIMEOUT_MS,
            ack_required: true,
            send_ack: true,
            max_retries: Some(MAX_RETRIES),
            backoff_scale_ms: SLOT_TIME_MS,
            backoff_max_exponent: BACKOFF_MAX_EXPONENT,
            suppress_duplicates: true,
            input_port: None,
            output_port: None,
            log_level: LOG_LEVEL.to_string(),
        }
    }
}

impl LinkConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: LinkConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(LinkError::InvalidConfig(msg));

        if self.sample_rate == 0 {
            return invalid("sample_rate must be positive".into());
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(self.carrier_frequency > 0.0 && self.carrier_frequency < nyquist)
        {
            return invalid(format!(
                "carrier_frequency {} Hz outside (0, {}) Hz",
                self.carrier_frequency, nyquist
            ));
        }
        if self.bit_depth == 0 {
            return invalid("bit_depth must be at least 1".into());
        }
        if self.payload_bytes == 0 {
            return invalid("payload_bytes must be at least 1".into());
        }
        let frame_bytes = self.payload_bytes + MAC_HEADER_BYTES + CRC_BYTES;
        if frame_bytes > self.max_frame_bytes
            || frame_bytes > self.length_prefix.max_length()
        {
            return invalid(format!(
                "a {}-byte payload does not fit a {:?} frame of at most {} bytes",
                self.payload_bytes, self.length_prefix, self.max_frame_bytes
            ));
        }
        if self.preamble_samples() == 0 {
            return invalid("preamble_duration_ms is too short".into());
        }
        if self.preamble_frequency_min <= 0.0
            || self.preamble_frequency_max >= nyquist
            || self.preamble_frequency_min >= self.preamble_frequency_max
        {
            return invalid(format!(
                "preamble sweep {}..{} Hz is not inside (0, {}) Hz",
                self.preamble_frequency_min,
                self.preamble_frequency_max,
                nyquist
            ));
        }
        if self.detector_window < self.preamble_samples() {
            return invalid(format!(
                "detector_window {} is shorter than the {}-sample preamble",
                self.detector_window,
                self.preamble_samples()
            ));
        }
        if self.detector_min_power_ratio >= self.detector_max_power_ratio {
            return invalid(
                "detector_min_power_ratio must be below detector_max_power_ratio"
                    .into(),
            );
        }
        if self.ack_timeout_ms == 0 {
            return invalid("ack_timeout_ms must be positive".into());
        }
        if self.backoff_max_exponent > 31 {
            return invalid("backoff_max_exponent must be at most 31".into());
        }
        Ok(())
    }

    pub fn preamble_duration(&self) -> Duration {
        Duration::from_secs_f32(self.preamble_duration_ms / 1000.0)
    }

    pub fn preamble_samples(&self) -> usize {
        (self.sample_rate as f32 * self.preamble_duration_ms / 1000.0).round()
            as usize
    }

    pub fn inter_frame_gap_samples(&self) -> usize {
        self.sample_rate as usize * self.inter_frame_gap_ms as usize / 1000
    }

    /// Bytes handed to the physical layer per MAC frame
    pub fn mac_frame_bytes(&self) -> usize {
        self.payload_bytes + MAC_HEADER_BYTES
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn samples_to_duration(&self, samples: usize) -> Duration {
        Duration::from_secs_f64(samples as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.preamble_samples(), 480);
        assert_eq!(config.inter_frame_gap_samples(), 240);
        assert_eq!(config.mac_frame_bytes(), PAYLOAD_BYTES + 3);
    }

    #[test]
    fn test_rejects_carrier_above_nyquist() {
        let config = LinkConfig {
            carrier_frequency: 30000.0,
            ..LinkConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LinkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_payload_too_large_for_one_byte_prefix() {
        let config = LinkConfig {
            length_prefix: LengthPrefix::OneByte,
            payload_bytes: 250,
            ..LinkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LinkConfig =
            serde_json::from_str(r#"{ "bit_depth": 6, "max_retries": null }"#)
                .unwrap();
        assert_eq!(config.bit_depth, 6);
        assert_eq!(config.max_retries, None);
        assert_eq!(config.sample_rate, SAMPLE_RATE);
        assert!(config.ack_required);
    }
}
