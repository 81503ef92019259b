//! Nearby peripheral discovery and single-connection lifecycle management.
//!
//! The [`bluetooth::manager::BluetoothManager`] owns scanning, the ranked
//! device list and the one live connection, and publishes every state change
//! through watch channels and an [`event::EventBus`].

pub mod bluetooth;
pub mod config;
pub mod dbus;
pub mod discovery;
pub mod error;
pub mod event;
pub mod state;
