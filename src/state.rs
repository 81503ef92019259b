//! Published scan, device list and connection state.
//!
//! Each stream is a `watch` channel: a subscriber always sees the latest
//! value and every later one. Every publication is also forwarded to the
//! event bus in order, so consumers that need the full transition history
//! (D-Bus signals, tests) never miss an intermediate state.

use smol_str::SmolStr;
use tokio::sync::watch;

use crate::{
   discovery::device::{DeviceAddress, DiscoveredDevice},
   event::{EventSender, ManagerEvent},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ScanState {
   #[default]
   Idle,
   Scanning,
   Error(SmolStr),
}

impl ScanState {
   pub fn name(&self) -> &'static str {
      self.into()
   }

   pub const fn is_scanning(&self) -> bool {
      matches!(self, Self::Scanning)
   }

   pub fn reason(&self) -> Option<&str> {
      match self {
         Self::Error(reason) => Some(reason),
         _ => None,
      }
   }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
   #[default]
   Disconnected,
   Connecting(DeviceAddress),
   Connected(DeviceAddress),
   Error(SmolStr),
}

impl ConnectionState {
   pub fn name(&self) -> &'static str {
      self.into()
   }

   pub const fn address(&self) -> Option<&DeviceAddress> {
      match self {
         Self::Connecting(address) | Self::Connected(address) => Some(address),
         _ => None,
      }
   }

   pub fn reason(&self) -> Option<&str> {
      match self {
         Self::Error(reason) => Some(reason),
         _ => None,
      }
   }
}

/// Read side of the published state.
#[derive(Debug, Clone)]
pub struct StateWatch {
   pub scan: watch::Receiver<ScanState>,
   pub devices: watch::Receiver<Vec<DiscoveredDevice>>,
   pub connection: watch::Receiver<ConnectionState>,
}

/// Write side of the published state, owned by the manager actor.
pub struct StatePublisher {
   scan: watch::Sender<ScanState>,
   devices: watch::Sender<Vec<DiscoveredDevice>>,
   connection: watch::Sender<ConnectionState>,
   events: EventSender,
}

impl StatePublisher {
   pub fn new(events: EventSender) -> Self {
      Self {
         scan: watch::Sender::new(ScanState::default()),
         devices: watch::Sender::new(Vec::new()),
         connection: watch::Sender::new(ConnectionState::default()),
         events,
      }
   }

   pub fn watch(&self) -> StateWatch {
      StateWatch {
         scan: self.scan.subscribe(),
         devices: self.devices.subscribe(),
         connection: self.connection.subscribe(),
      }
   }

   pub fn scan_state(&self) -> ScanState {
      self.scan.borrow().clone()
   }

   pub fn connection_state(&self) -> ConnectionState {
      self.connection.borrow().clone()
   }

   pub fn publish_scan(&self, state: ScanState) {
      self.scan.send_replace(state.clone());
      self.events.emit(ManagerEvent::ScanStateChanged(state));
   }

   pub fn publish_devices(&self, devices: &[DiscoveredDevice]) {
      self.devices.send_replace(devices.to_vec());
      self
         .events
         .emit(ManagerEvent::DevicesChanged(devices.to_vec()));
   }

   pub fn publish_connection(&self, state: ConnectionState) {
      self.connection.send_replace(state.clone());
      self
         .events
         .emit(ManagerEvent::ConnectionStateChanged(state));
   }
}

#[cfg(test)]
mod tests {
   use std::sync::Arc;

   use super::*;
   use crate::event::NullEventBus;

   #[test]
   fn test_state_names() {
      assert_eq!(ScanState::Idle.name(), "idle");
      assert_eq!(ScanState::Error("x".into()).name(), "error");
      let addr = DeviceAddress::new("AA:01").unwrap();
      assert_eq!(ConnectionState::Connecting(addr.clone()).name(), "connecting");
      assert_eq!(ConnectionState::Connected(addr.clone()).address(), Some(&addr));
      assert_eq!(ConnectionState::Error("lost".into()).reason(), Some("lost"));
   }

   #[test]
   fn test_late_subscriber_sees_latest() {
      let publisher = StatePublisher::new(Arc::new(NullEventBus));
      publisher.publish_scan(ScanState::Scanning);
      let watch = publisher.watch();
      assert_eq!(*watch.scan.borrow(), ScanState::Scanning);
      assert_eq!(*watch.connection.borrow(), ConnectionState::Disconnected);
      assert!(watch.devices.borrow().is_empty());
   }
}
