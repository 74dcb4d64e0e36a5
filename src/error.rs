use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Recoverable demodulation failures. The frame in flight is discarded and
/// the demodulator goes back to preamble detection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid line code symbol {0:#05x}")]
    InvalidSymbol(u16),

    #[error("frame header declares an empty payload")]
    EmptyFrame,

    #[error("frame index {got} does not follow {expected}")]
    UnexpectedIndex { expected: u8, got: u8 },

    #[error("CRC mismatch: computed {computed:#04x}, received {received:#04x}")]
    CrcMismatch { computed: u8, received: u8 },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("audio backend: {0}")]
    Backend(String),

    #[error("device already started")]
    AlreadyStarted,

    #[error("failed to spawn device thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PhyError {
    #[error("payload of {len} bytes needs more than {max_frames} frames")]
    PayloadTooLarge { len: usize, max_frames: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to spawn decoder: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("transmission cancelled")]
    SendCancelled,

    #[error("physical layer is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum MacError {
    #[error("frame {index} was not acknowledged after {attempts} attempts")]
    RetriesExhausted { index: u8, attempts: u32 },

    #[error("invalid MAC address {0}")]
    InvalidAddress(u8),

    #[error("malformed MAC header ({0} bytes)")]
    MalformedHeader(usize),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Phy(#[from] PhyError),

    #[error("MAC layer is closed")]
    Closed,
}
