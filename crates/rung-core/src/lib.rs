pub mod config;
pub mod error;

#[cfg(feature = "testing")]
pub mod testing;

pub use config::{DatabaseConfig, KeepaliveConfig, RungConfig};
pub use error::{Result, RungError};
