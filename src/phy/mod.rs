// Physical layer: baseband 8b/10b signalling framed by a ramp preamble,
// with a CRC-8 per frame and a correlation-based receiver.

pub mod crc;
pub mod decoder;
pub mod demodulator;
pub mod encoder;
pub mod frame;
pub mod layer;
pub mod line_coding;
pub mod modulator;
pub mod power;
pub mod preamble;

pub use demodulator::{DemodEvent, Demodulator};
pub use encoder::SendHandle;
pub use frame::PhyHeader;
pub use layer::PhysicalLayer;
pub use modulator::Modulator;
pub use power::{CarrierSense, PowerMonitor};
