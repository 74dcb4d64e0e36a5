// Link layer: addressed frames, stop-and-wait ACKs, carrier sense and
// back-off on top of the physical layer.

pub mod backoff;
pub mod csma;
pub mod header;

pub use backoff::{Backoff, FixedBackoff, RandomBackoff};
pub use csma::MacLayer;
pub use header::{FrameType, MacHeader};
