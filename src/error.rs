//! Error types for the pairing service.
//!
//! Precondition and transport failures inside the manager are published as
//! `Error` states rather than returned; the variants here cover setup
//! (config, D-Bus, BlueZ session), transport adapters, and a manager that is
//! no longer running.

use thiserror::Error;

/// Main error type for the pairing service.
#[derive(Error, Debug)]
pub enum PairError {
   #[cfg(feature = "bluez")]
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Invalid device address: {0:?}")]
   InvalidAddress(String),

   #[error("Scan failed with error code: {0}")]
   ScanFailed(i32),

   #[error("Connection failed with status: {0}")]
   LinkFailed(i32),

   #[error("Transport error: {0}")]
   Transport(String),

   #[error("Request timeout")]
   RequestTimeout,

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Manager has been shut down")]
   ManagerShutdown,
}

/// Convenience type alias for Results with `PairError`.
pub type Result<T> = std::result::Result<T, PairError>;
