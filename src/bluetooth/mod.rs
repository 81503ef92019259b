//! Bluetooth communication layer.
//!
//! This module provides the transport abstraction, the connection lifecycle
//! and the manager actor that sequences scanning and connecting.

#[cfg(feature = "bluez")]
pub mod bluez;
pub mod lifecycle;
pub mod manager;
#[cfg(test)]
pub(crate) mod mock;
pub mod transport;
