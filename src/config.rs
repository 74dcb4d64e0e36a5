//! Runtime configuration.
//!
//! Every field has a default taken from [`crate::utils::consts`], so a JSON
//! file only needs to name what it changes. Invalid values are rejected by
//! `validate()` before any layer is constructed.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::phy::preamble::preamble_len;
use crate::utils::consts::*;
use crate::utils::fixed::MAX_INT;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub phy: PhyConfig,
    pub mac: MacConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device.validate()?;
        self.phy.validate()?;
        self.mac.validate()?;
        if self.mac.byte_per_frame + MAC_HEADER_BYTES > self.phy.byte_per_frame {
            return Err(ConfigError::invalid(
                "mac.byte_per_frame",
                format!(
                    "{} bytes plus the {}-byte MAC header exceed phy.byte_per_frame ({})",
                    self.mac.byte_per_frame, MAC_HEADER_BYTES, self.phy.byte_per_frame
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub client_name: String,
    pub sample_rate: u32,
    /// Wire the JACK ports to the first physical capture/playback ports
    pub connect_system_ports: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            client_name: JACK_CLIENT_NAME.to_string(),
            sample_rate: SAMPLE_RATE,
            connect_system_ports: true,
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_name.is_empty() {
            return Err(ConfigError::invalid("device.client_name", "empty"));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::invalid("device.sample_rate", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreambleConfig {
    /// Ramp length; the preamble spans `2 * n * (n + 1)` samples
    pub n: usize,
    pub amplitude: f64,
    /// Correlation a candidate must exceed, in full-scale sample units
    pub threshold: f64,
}

impl Default for PreambleConfig {
    fn default() -> Self {
        Self {
            n: PREAMBLE_N,
            amplitude: PREAMBLE_AMPLITUDE,
            threshold: PREAMBLE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarrierConfig {
    pub amplitude: f64,
    /// Samples per payload bit
    pub size: usize,
    /// Samples per header bit
    pub header_size: usize,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            amplitude: CARRIER_AMPLITUDE,
            size: CARRIER_SIZE,
            header_size: HEADER_CARRIER_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerMonitorConfig {
    pub threshold: f64,
    pub window: usize,
}

impl Default for PowerMonitorConfig {
    fn default() -> Self {
        Self {
            threshold: POWER_MONITOR_THRESHOLD,
            window: POWER_MONITOR_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhyConfig {
    pub byte_per_frame: usize,
    /// Zero samples after every frame
    pub frame_interval: usize,
    pub crc_polynomial: u8,
    pub preamble: PreambleConfig,
    pub carrier: CarrierConfig,
    pub power_monitor: PowerMonitorConfig,
    /// Device blocks held between the audio callback and the decoder
    pub input_buffer_size: usize,
    /// Modulated packets waiting for the audio callback
    pub output_buffer_size: usize,
    /// Decoded packets waiting for a reader
    pub packet_buffer_size: usize,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            byte_per_frame: PHY_BYTE_PER_FRAME,
            frame_interval: FRAME_INTERVAL_SAMPLES,
            crc_polynomial: CRC8_POLYNOMIAL,
            preamble: PreambleConfig::default(),
            carrier: CarrierConfig::default(),
            power_monitor: PowerMonitorConfig::default(),
            input_buffer_size: INPUT_BUFFER_SIZE,
            output_buffer_size: OUTPUT_BUFFER_SIZE,
            packet_buffer_size: PACKET_BUFFER_SIZE,
        }
    }
}

fn check_amplitude(field: &'static str, amplitude: f64) -> Result<(), ConfigError> {
    if !(amplitude > 0.0 && amplitude <= 1.0) {
        return Err(ConfigError::invalid(
            field,
            format!("{amplitude} is outside (0, 1]"),
        ));
    }
    Ok(())
}

/// Sample counts summed in fixed point.
fn check_window(field: &'static str, size: usize) -> Result<(), ConfigError> {
    if size == 0 {
        return Err(ConfigError::invalid(field, "must be positive"));
    }
    if size > MAX_INT as usize {
        return Err(ConfigError::invalid(
            field,
            format!("{size} samples overflow fixed point (max {MAX_INT})"),
        ));
    }
    Ok(())
}

impl PhyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.byte_per_frame == 0 || self.byte_per_frame > MAX_PHY_PAYLOAD {
            return Err(ConfigError::invalid(
                "phy.byte_per_frame",
                format!("{} is outside 1..={}", self.byte_per_frame, MAX_PHY_PAYLOAD),
            ));
        }
        if self.preamble.n == 0 {
            return Err(ConfigError::invalid("phy.preamble.n", "must be positive"));
        }
        check_amplitude("phy.preamble.amplitude", self.preamble.amplitude)?;
        check_amplitude("phy.carrier.amplitude", self.carrier.amplitude)?;

        // A perfect match correlates to len * amplitude^2 (input at preamble level)
        let peak = preamble_len(self.preamble.n) as f64
            * self.preamble.amplitude
            * self.preamble.amplitude;
        if !(self.preamble.threshold > 0.0 && self.preamble.threshold < peak) {
            return Err(ConfigError::invalid(
                "phy.preamble.threshold",
                format!("{} is outside (0, {peak})", self.preamble.threshold),
            ));
        }
        // Correlation against full-scale input reaches len * amplitude
        let correlation = preamble_len(self.preamble.n) as f64 * self.preamble.amplitude;
        if correlation >= MAX_INT as f64 {
            return Err(ConfigError::invalid(
                "phy.preamble.n",
                format!("correlation of {correlation} overflows fixed point (max {MAX_INT})"),
            ));
        }
        for (field, size) in [
            ("phy.carrier.size", self.carrier.size),
            ("phy.carrier.header_size", self.carrier.header_size),
            ("phy.power_monitor.window", self.power_monitor.window),
        ] {
            check_window(field, size)?;
        }
        if !(self.power_monitor.threshold > 0.0 && self.power_monitor.threshold < 1.0) {
            return Err(ConfigError::invalid(
                "phy.power_monitor.threshold",
                format!("{} is outside (0, 1)", self.power_monitor.threshold),
            ));
        }
        for (field, size) in [
            ("phy.input_buffer_size", self.input_buffer_size),
            ("phy.output_buffer_size", self.output_buffer_size),
            ("phy.packet_buffer_size", self.packet_buffer_size),
        ] {
            if size == 0 {
                return Err(ConfigError::invalid(field, "must be positive"));
            }
        }
        Ok(())
    }

    pub fn preamble_amplitude(&self) -> i32 {
        amplitude_to_pcm(self.preamble.amplitude)
    }

    pub fn carrier_amplitude(&self) -> i32 {
        amplitude_to_pcm(self.carrier.amplitude)
    }
}

fn amplitude_to_pcm(amplitude: f64) -> i32 {
    (amplitude * i32::MAX as f64).round() as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffConfig {
    /// Uniform delay in `[min_ms, max_ms]`
    Random { min_ms: u64, max_ms: u64 },
    Fixed { delay_ms: u64 },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Random {
            min_ms: BACKOFF_MIN_MS,
            max_ms: BACKOFF_MAX_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MacConfig {
    pub address: u8,
    pub byte_per_frame: usize,
    pub ack_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff: BackoffConfig,
    pub output_buffer_size: usize,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            address: 0,
            byte_per_frame: MAC_BYTE_PER_FRAME,
            ack_timeout_ms: ACK_TIMEOUT_MS,
            max_retries: MAX_RETRIES,
            backoff: BackoffConfig::default(),
            output_buffer_size: MAC_OUTPUT_BUFFER_SIZE,
        }
    }
}

impl MacConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address > MAX_MAC_ADDRESS {
            return Err(ConfigError::invalid(
                "mac.address",
                format!("{} is outside 0..={}", self.address, MAX_MAC_ADDRESS),
            ));
        }
        if self.byte_per_frame == 0 {
            return Err(ConfigError::invalid("mac.byte_per_frame", "must be positive"));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::invalid("mac.ack_timeout_ms", "must be positive"));
        }
        if self.output_buffer_size == 0 {
            return Err(ConfigError::invalid(
                "mac.output_buffer_size",
                "must be positive",
            ));
        }
        if let BackoffConfig::Random { min_ms, max_ms } = self.backoff {
            if min_ms > max_ms {
                return Err(ConfigError::invalid(
                    "mac.backoff",
                    format!("min_ms {min_ms} exceeds max_ms {max_ms}"),
                ));
            }
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.phy.byte_per_frame, 127);
        assert_eq!(config.mac.byte_per_frame, 125);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "phy": { "carrier": { "size": 2 } },
                "mac": { "address": 3, "backoff": { "kind": "fixed", "delay_ms": 20 } }
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.phy.carrier.size, 2);
        assert_eq!(config.phy.carrier.header_size, HEADER_CARRIER_SIZE);
        assert_eq!(config.mac.address, 3);
        assert_eq!(config.mac.backoff, BackoffConfig::Fixed { delay_ms: 20 });
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let mut config = Config::default();
        config.phy.carrier.size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "phy.carrier.size", .. })
        ));

        let mut config = Config::default();
        config.phy.preamble.threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.phy.preamble.threshold = 1000.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mac.address = 8;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.phy.byte_per_frame = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "mac.byte_per_frame", .. })
        ));

        let mut config = Config::default();
        config.mac.backoff = BackoffConfig::Random { min_ms: 10, max_ms: 5 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fixed_point_overflow_rejected() {
        // 2 * 128 * 129 samples correlate past the Q16.16 range
        let mut config = Config::default();
        config.phy.preamble.n = 128;
        config.phy.preamble.threshold = 20000.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "phy.preamble.n", .. })
        ));

        let mut config = Config::default();
        config.phy.preamble.n = 127;
        config.phy.preamble.amplitude = 1.0;
        config.phy.preamble.threshold = 20000.0;
        config.validate().unwrap();

        let mut config = Config::default();
        config.phy.power_monitor.window = 40000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "phy.power_monitor.window", .. })
        ));

        let mut config = Config::default();
        config.phy.power_monitor.window = MAX_INT as usize;
        config.validate().unwrap();

        let mut config = Config::default();
        config.phy.carrier.size = 1 << 16;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "phy.carrier.size", .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file("/nonexistent/aether-link.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
