pub mod buffer;
pub mod config;
pub mod device_info;
pub mod error;
pub mod format;
pub mod state;
pub mod stats;
