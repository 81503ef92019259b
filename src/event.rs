//! Event handling system for state transitions.
//!
//! This module provides the event infrastructure for notifying consumers
//! about scan state, device list and connection state changes.

use std::sync::Arc;

use crate::{
   discovery::device::DiscoveredDevice,
   state::{ConnectionState, ScanState},
};

/// Events that can be emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
   ScanStateChanged(ScanState),
   DevicesChanged(Vec<DiscoveredDevice>),
   ConnectionStateChanged(ConnectionState),
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: ManagerEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;

/// Event bus that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventBus;

impl EventBus for NullEventBus {
   fn emit(&self, _event: ManagerEvent) {}
}
