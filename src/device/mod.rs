pub mod jack;
pub mod loopback;
pub mod network;

use crate::error::DeviceError;

pub use self::jack::JackDevice;
pub use loopback::Loopback;
pub use network::{Network, NetworkNode};

/// Called once per device period with the captured block and the block to
/// play. Runs on the device thread and must not block.
pub type AudioCallback = Box<dyn FnMut(&[i32], &mut [i32]) + Send + 'static>;

/// A full-duplex sample stream.
pub trait Device: Send {
    fn start(&mut self, callback: AudioCallback) -> Result<(), DeviceError>;

    /// Stops the stream and drops the callback. Idempotent.
    fn stop(&mut self);
}

pub fn pcm_from_f32(sample: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32
}

pub fn pcm_to_f32(sample: i32) -> f32 {
    (sample as f64 / i32::MAX as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_conversion() {
        assert_eq!(pcm_from_f32(0.0), 0);
        assert_eq!(pcm_from_f32(1.0), i32::MAX);
        assert_eq!(pcm_from_f32(-1.0), -i32::MAX);
        assert_eq!(pcm_from_f32(4.0), i32::MAX);
        assert!((pcm_to_f32(pcm_from_f32(0.25)) - 0.25).abs() < 1e-6);
    }
}
