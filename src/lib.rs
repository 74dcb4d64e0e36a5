pub mod config;
pub mod device;
pub mod error;
pub mod mac;
pub mod phy;
pub mod ui;
pub mod utils;
