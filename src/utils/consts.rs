/// Log level (overridable through RUST_LOG)
pub const LOG_LEVEL: &str = "info";

/// JACK client name
pub const JACK_CLIENT_NAME: &str = "aether_link";

/// Input port name
pub const INPUT_PORT_NAME: &str = "al_in";

/// Output port name
pub const OUTPUT_PORT_NAME: &str = "al_out";

/// Progress refresh interval (ms)
pub const PROGRESS_UPDATE_INTERVAL_MS: u64 = 50;

// ============================================================================
// Device Parameters
// ============================================================================

/// Sample rate (Hz)
pub const SAMPLE_RATE: u32 = 48000;

/// Samples per callback for the simulated devices
pub const DEVICE_BUFFER_SIZE: usize = 512;

// ============================================================================
// Physical Layer Parameters
// ============================================================================

/// Ramp length of the binary chirp preamble
pub const PREAMBLE_N: usize = 4;

/// Preamble amplitude relative to full scale
pub const PREAMBLE_AMPLITUDE: f64 = 1.0;

/// Minimum correlation (in full-scale sample units) for a preamble candidate
pub const PREAMBLE_THRESHOLD: f64 = 20.0;

/// Carrier amplitude relative to full scale
pub const CARRIER_AMPLITUDE: f64 = 1.0;

/// Samples per payload bit
pub const CARRIER_SIZE: usize = 3;

/// Samples per header bit
pub const HEADER_CARRIER_SIZE: usize = 3;

/// Maximum payload carried by a single PHY frame
pub const MAX_PHY_PAYLOAD: usize = 127;

/// Default payload bytes per PHY frame
pub const PHY_BYTE_PER_FRAME: usize = MAX_PHY_PAYLOAD;

/// Frames per PHY packet are indexed by a single byte
pub const MAX_FRAMES_PER_PACKET: usize = 256;

/// Size (1) | Last flag (1 bit) + Frame index (1)
pub const PHY_HEADER_BYTES: usize = 2;

/// Silence appended after every frame (samples)
pub const FRAME_INTERVAL_SAMPLES: usize = 64;

/// x^8 + x^2 + x + 1
pub const CRC8_POLYNOMIAL: u8 = 0x07;

/// Input queue capacity (device blocks)
pub const INPUT_BUFFER_SIZE: usize = 1024;

/// Output queue capacity (modulated packets)
pub const OUTPUT_BUFFER_SIZE: usize = 16;

/// Decoded packets waiting for a reader
pub const PACKET_BUFFER_SIZE: usize = 64;

// --- Carrier Sense ---
/// Average magnitude above which the channel is considered busy
pub const POWER_MONITOR_THRESHOLD: f64 = 0.4;
/// Moving-average window (samples)
pub const POWER_MONITOR_WINDOW: usize = 10;
/// Re-check interval while waiting for an idle channel
pub const CARRIER_SENSE_POLL_MS: u64 = 5;

// ============================================================================
// MAC Layer Parameters
// ============================================================================

/// Source (3 bits) | Destination (3 bits) | Type (1 bit) | Last (1 bit) + Index (1)
pub const MAC_HEADER_BYTES: usize = 2;

/// Highest address representable in the MAC header
pub const MAX_MAC_ADDRESS: u8 = 7;

/// Payload bytes per MAC frame
pub const MAC_BYTE_PER_FRAME: usize = PHY_BYTE_PER_FRAME - MAC_HEADER_BYTES;

pub const ACK_TIMEOUT_MS: u64 = 300;

pub const MAX_RETRIES: u32 = 5;

/// Back-off bounds after a detected collision
pub const BACKOFF_MIN_MS: u64 = 0;
pub const BACKOFF_MAX_MS: u64 = 100;

/// Delivered packets waiting for a reader
pub const MAC_OUTPUT_BUFFER_SIZE: usize = 64;
