//! Radio abstraction consumed by the manager.
//!
//! A [`Transport`] performs the physical scanning and link establishment;
//! a [`CapabilityGate`] answers whether the process may use the radio and
//! whether it is switched on. Transport callbacks are delivered through
//! [`ScanSink`] and [`LinkSink`], which are cheap to clone, never block, and
//! can be used from any thread.

use std::future::Future;

use log::debug;
use smol_str::SmolStr;
use tokio::sync::mpsc;

use crate::{
   bluetooth::manager::ManagerCommand,
   discovery::device::{DeviceAddress, Observation},
   error::Result,
};

/// Permission and radio-availability checks. Pure queries.
pub trait CapabilityGate: Send + Sync + 'static {
   fn has_required_capabilities(&self) -> impl Future<Output = bool> + Send;

   fn is_radio_enabled(&self) -> impl Future<Output = bool> + Send;
}

/// State changes reported by a link opened with [`Transport::open_link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
   Established,
   Disconnected,
   Failed(SmolStr),
   ServicesDiscovered(usize),
   ServiceDiscoveryFailed(SmolStr),
}

pub trait Transport: Send + Sync + 'static {
   /// Live scan registration; dropped or passed to `end_scan` to stop.
   type Subscription: Send + Sync + 'static;
   /// Logical link to one peripheral.
   type Link: Send + Sync + 'static;

   /// Devices already known to the platform (paired/bonded).
   fn bonded_devices(&self) -> impl Future<Output = Result<Vec<Observation>>> + Send;

   fn begin_scan(&self, sink: ScanSink) -> impl Future<Output = Result<Self::Subscription>> + Send;

   fn end_scan(&self, subscription: Self::Subscription) -> impl Future<Output = Result<()>> + Send;

   /// Starts establishing a link and returns its handle immediately. The
   /// outcome is reported through `sink`.
   fn open_link(&self, address: &DeviceAddress, sink: LinkSink) -> Result<Self::Link>;

   /// Tears the link down and releases the handle.
   fn close_link(&self, link: Self::Link) -> impl Future<Output = Result<()>> + Send;

   /// Starts service discovery on an established link. The result comes back
   /// through the link's sink.
   fn discover_services(&self, link: &Self::Link);
}

/// Delivers observations for one scan session.
#[derive(Debug, Clone)]
pub struct ScanSink {
   session: u64,
   tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl ScanSink {
   pub(crate) const fn new(session: u64, tx: mpsc::UnboundedSender<ManagerCommand>) -> Self {
      Self { session, tx }
   }

   pub const fn session(&self) -> u64 {
      self.session
   }

   /// Returns `false` once the manager is gone.
   pub fn observe(&self, observation: Observation) -> bool {
      self.observe_batch(vec![observation])
   }

   pub fn observe_batch(&self, observations: Vec<Observation>) -> bool {
      if observations.is_empty() {
         return !self.is_closed();
      }
      self.send(ManagerCommand::Observed {
         session: self.session,
         observations,
      })
   }

   /// Reports a radio-level scan failure.
   pub fn fail(&self, reason: impl Into<SmolStr>) -> bool {
      self.send(ManagerCommand::ScanFailed {
         session: self.session,
         reason: reason.into(),
      })
   }

   pub fn is_closed(&self) -> bool {
      self.tx.is_closed()
   }

   fn send(&self, cmd: ManagerCommand) -> bool {
      if self.tx.send(cmd).is_err() {
         debug!("Scan session {} outlived the manager", self.session);
         return false;
      }
      true
   }
}

/// Delivers state changes for one link attempt.
#[derive(Debug, Clone)]
pub struct LinkSink {
   attempt: u64,
   tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl LinkSink {
   pub(crate) const fn new(attempt: u64, tx: mpsc::UnboundedSender<ManagerCommand>) -> Self {
      Self { attempt, tx }
   }

   pub const fn attempt(&self) -> u64 {
      self.attempt
   }

   pub fn established(&self) -> bool {
      self.send(LinkEvent::Established)
   }

   pub fn disconnected(&self) -> bool {
      self.send(LinkEvent::Disconnected)
   }

   pub fn failed(&self, reason: impl Into<SmolStr>) -> bool {
      self.send(LinkEvent::Failed(reason.into()))
   }

   pub fn services_discovered(&self, count: usize) -> bool {
      self.send(LinkEvent::ServicesDiscovered(count))
   }

   pub fn service_discovery_failed(&self, reason: impl Into<SmolStr>) -> bool {
      self.send(LinkEvent::ServiceDiscoveryFailed(reason.into()))
   }

   pub fn send(&self, event: LinkEvent) -> bool {
      let attempt = self.attempt;
      if self.tx.send(ManagerCommand::Link { attempt, event }).is_err() {
         debug!("Link attempt {attempt} outlived the manager");
         return false;
      }
      true
   }
}
