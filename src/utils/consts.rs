/// 日志级别（可被 RUST_LOG 覆盖）
pub const LOG_LEVEL: &str = "info";

/// JACK 客户端名称
pub const JACK_CLIENT_NAME: &str = "sonolink";

/// 输入端口名称
pub const INPUT_PORT_NAME: &str = "sl_in";

/// 输出端口名称
pub const OUTPUT_PORT_NAME: &str = "sl_out";

// ============================================================================
// Physical Layer Parameters
// ============================================================================

/// Sample rate (Hz)
pub const SAMPLE_RATE: u32 = 48000;

/// Carrier frequency (Hz); 3 samples cover half a period at 48 kHz
pub const CARRIER_FREQUENCY: f32 = 8000.0;

/// Output amplitude of preamble and carrier
pub const CARRIER_GAIN: f32 = 0.8;

/// Samples per modulated symbol
pub const BIT_DEPTH: usize = 3;

/// Preamble duration (ms), 480 samples at 48 kHz
pub const PREAMBLE_DURATION_MS: f32 = 10.0;

pub const PREAMBLE_FREQ_MIN: f32 = 2000.0;
pub const PREAMBLE_FREQ_MAX: f32 = 10000.0;

/// Samples examined per detector block on top of the preamble length
pub const DETECTOR_WINDOW: usize = 2048;

/// Absolute correlation floor (normalized by preamble length)
pub const DETECTOR_POWER_FLOOR: f32 = 0.05;

/// A preamble correlates at roughly the local power; far below is noise
pub const DETECTOR_MIN_POWER_RATIO: f32 = 0.5;

/// Correlations above this multiple of local power are spikes
pub const DETECTOR_MAX_POWER_RATIO: f32 = 3.0;

/// Smoothing factor of the local power estimate
pub const POWER_EMA_ALPHA: f32 = 1.0 / 64.0;

/// Silence appended after every frame
pub const INTER_FRAME_GAP_MS: u32 = 5;

/// CRC32 trailer size
pub const CRC_BYTES: usize = 4;

/// Upper bound on a decoded length prefix
pub const MAX_FRAME_BYTES: usize = 2048;

/// Capacity of every stage-to-stage channel
pub const CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// MAC Parameters
// ============================================================================

/// MAC header: dest (1) + src (1) + type (1)
pub const MAC_HEADER_BYTES: usize = 3;

/// Default fixed payload size per MAC frame
pub const PAYLOAD_BYTES: usize = 64;

pub const ACK_TIMEOUT_MS: u64 = 500;

/// Retransmissions after the first attempt
pub const MAX_RETRIES: u32 = 8;

/// Duration of a single backoff slot in milliseconds.
pub const SLOT_TIME_MS: u64 = 10;

/// Backoff window stops growing after 2^6 - 1 slots
pub const BACKOFF_MAX_EXPONENT: u32 = 6;

/// Duplicate data frames are suppressed within this many ack timeouts
pub const DUPLICATE_WINDOW_FACTOR: u32 = 4;
