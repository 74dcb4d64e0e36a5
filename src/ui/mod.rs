pub mod progress;

use crate::config::Config;

pub fn print_banner() {
    println!("aether-link {}", env!("CARGO_PKG_VERSION"));
}

/// One-line description of the active link parameters.
pub fn describe(config: &Config) -> String {
    format!(
        "addr {} | {} Hz | {} samples/bit | {} B/frame | ack {} ms x{}",
        config.mac.address,
        config.device.sample_rate,
        config.phy.carrier.size,
        config.mac.byte_per_frame,
        config.mac.ack_timeout_ms,
        config.mac.max_retries,
    )
}
