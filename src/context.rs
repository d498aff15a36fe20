use std::sync::Arc;

use tracing::debug;

use crate::acoustic::PreambleBuilder;
use crate::config::LinkConfig;
use crate::error::Result;

/// Read-only state shared by every component of one node: the validated
/// configuration and the preamble cache.
pub struct LinkContext {
    config: LinkConfig,
    preambles: PreambleBuilder,
}

impl LinkContext {
    pub fn new(config: LinkConfig) -> Result<Arc<Self>> {
        config.validate()?;
        debug!("Link context: {:?}", config);
        let preambles = PreambleBuilder::new(
            config.preamble_frequency_min,
            config.preamble_frequency_max,
        );
        Ok(Arc::new(Self { config, preambles }))
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn preamble(&self) -> Arc<[f32]> {
        self.preambles
            .build(self.config.sample_rate, self.config.preamble_duration())
    }

    /// Samples one frame with `frame_bytes` bytes occupies on air, preamble
    /// and inter-frame gap included
    pub fn frame_samples(&self, frame_bytes: usize) -> usize {
        let config = &self.config;
        let coded = frame_bytes + config.length_prefix.size()
            + crate::utils::consts::CRC_BYTES;
        let symbols = coded * 8 + config.symbol_strategy.reference_symbols();
        config.preamble_samples() + symbols * config.bit_depth
            + config.inter_frame_gap_samples()
    }
}
