pub mod consts;
pub mod fixed;
pub mod logging;
pub mod signal;
pub mod wav;
