//! Recording transport, gate and event bus for tests.

use std::sync::{
   Arc,
   atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use crate::{
   bluetooth::transport::{CapabilityGate, LinkSink, ScanSink, Transport},
   discovery::device::{DeviceAddress, Observation},
   error::{PairError, Result},
   event::{EventBus, ManagerEvent},
   state::{ConnectionState, ScanState},
};

#[derive(Default)]
struct MockState {
   bonded: Vec<Observation>,
   fail_bonded: bool,
   fail_begin_scan: bool,
   fail_open: bool,
   fail_close: bool,

   scan_sinks: Vec<ScanSink>,
   active_scans: usize,
   scans_begun: usize,
   scans_ended: usize,

   next_link: u64,
   link_sinks: Vec<(DeviceAddress, LinkSink)>,
   live: Vec<(u64, DeviceAddress)>,
   max_live: usize,
   opened: Vec<DeviceAddress>,
   closed: Vec<DeviceAddress>,
   service_discoveries: Vec<DeviceAddress>,
}

#[derive(Debug)]
pub struct MockSubscription(u64);

#[derive(Debug)]
pub struct MockLink {
   id: u64,
   address: DeviceAddress,
}

#[derive(Clone, Default)]
pub struct MockTransport(Arc<Mutex<MockState>>);

impl MockTransport {
   pub fn with_bonded(self, bonded: Vec<Observation>) -> Self {
      self.0.lock().bonded = bonded;
      self
   }

   pub fn fail_bonded(&self, fail: bool) {
      self.0.lock().fail_bonded = fail;
   }

   pub fn fail_begin_scan(&self, fail: bool) {
      self.0.lock().fail_begin_scan = fail;
   }

   pub fn fail_open(&self, fail: bool) {
      self.0.lock().fail_open = fail;
   }

   pub fn fail_close(&self, fail: bool) {
      self.0.lock().fail_close = fail;
   }

   pub fn last_scan_sink(&self) -> Option<ScanSink> {
      self.0.lock().scan_sinks.last().cloned()
   }

   pub fn active_scans(&self) -> usize {
      self.0.lock().active_scans
   }

   pub fn scans_begun(&self) -> usize {
      self.0.lock().scans_begun
   }

   pub fn scans_ended(&self) -> usize {
      self.0.lock().scans_ended
   }

   /// Sink of the most recent link opened to `address`.
   pub fn link_sink(&self, address: &DeviceAddress) -> Option<LinkSink> {
      self
         .0
         .lock()
         .link_sinks
         .iter()
         .rev()
         .find(|(addr, _)| addr == address)
         .map(|(_, sink)| sink.clone())
   }

   pub fn live_links(&self) -> Vec<DeviceAddress> {
      self
         .0
         .lock()
         .live
         .iter()
         .map(|(_, addr)| addr.clone())
         .collect()
   }

   pub fn max_live_links(&self) -> usize {
      self.0.lock().max_live
   }

   pub fn opened(&self) -> Vec<DeviceAddress> {
      self.0.lock().opened.clone()
   }

   pub fn closed(&self) -> Vec<DeviceAddress> {
      self.0.lock().closed.clone()
   }

   pub fn service_discoveries(&self) -> Vec<DeviceAddress> {
      self.0.lock().service_discoveries.clone()
   }
}

impl Transport for MockTransport {
   type Subscription = MockSubscription;
   type Link = MockLink;

   async fn bonded_devices(&self) -> Result<Vec<Observation>> {
      let state = self.0.lock();
      if state.fail_bonded {
         return Err(PairError::Transport("bonded lookup failed".into()));
      }
      Ok(state.bonded.clone())
   }

   async fn begin_scan(&self, sink: ScanSink) -> Result<MockSubscription> {
      let mut state = self.0.lock();
      if state.fail_begin_scan {
         return Err(PairError::ScanFailed(2));
      }
      let session = sink.session();
      state.scan_sinks.push(sink);
      state.active_scans += 1;
      state.scans_begun += 1;
      Ok(MockSubscription(session))
   }

   async fn end_scan(&self, _subscription: MockSubscription) -> Result<()> {
      let mut state = self.0.lock();
      state.active_scans = state.active_scans.saturating_sub(1);
      state.scans_ended += 1;
      Ok(())
   }

   fn open_link(&self, address: &DeviceAddress, sink: LinkSink) -> Result<MockLink> {
      let mut state = self.0.lock();
      if state.fail_open {
         return Err(PairError::LinkFailed(133));
      }
      state.next_link += 1;
      let id = state.next_link;
      state.link_sinks.push((address.clone(), sink));
      state.live.push((id, address.clone()));
      state.max_live = state.max_live.max(state.live.len());
      state.opened.push(address.clone());
      Ok(MockLink {
         id,
         address: address.clone(),
      })
   }

   async fn close_link(&self, link: MockLink) -> Result<()> {
      let mut state = self.0.lock();
      state.live.retain(|(id, _)| *id != link.id);
      state.closed.push(link.address);
      if state.fail_close {
         return Err(PairError::Transport("close refused".into()));
      }
      Ok(())
   }

   fn discover_services(&self, link: &MockLink) {
      self
         .0
         .lock()
         .service_discoveries
         .push(link.address.clone());
   }
}

#[derive(Clone)]
pub struct MockGate {
   capabilities: Arc<AtomicBool>,
   radio: Arc<AtomicBool>,
}

impl Default for MockGate {
   fn default() -> Self {
      Self {
         capabilities: Arc::new(AtomicBool::new(true)),
         radio: Arc::new(AtomicBool::new(true)),
      }
   }
}

impl MockGate {
   pub fn set_capabilities(&self, granted: bool) {
      self.capabilities.store(granted, Ordering::SeqCst);
   }

   pub fn set_radio(&self, enabled: bool) {
      self.radio.store(enabled, Ordering::SeqCst);
   }
}

impl CapabilityGate for MockGate {
   async fn has_required_capabilities(&self) -> bool {
      self.capabilities.load(Ordering::SeqCst)
   }

   async fn is_radio_enabled(&self) -> bool {
      self.radio.load(Ordering::SeqCst)
   }
}

/// Event bus that keeps every published transition.
#[derive(Default)]
pub struct RecordingBus(Mutex<Vec<ManagerEvent>>);

impl EventBus for RecordingBus {
   fn emit(&self, event: ManagerEvent) {
      self.0.lock().push(event);
   }
}

impl RecordingBus {
   pub fn scan_states(&self) -> Vec<ScanState> {
      self
         .0
         .lock()
         .iter()
         .filter_map(|e| match e {
            ManagerEvent::ScanStateChanged(state) => Some(state.clone()),
            _ => None,
         })
         .collect()
   }

   pub fn connection_states(&self) -> Vec<ConnectionState> {
      self
         .0
         .lock()
         .iter()
         .filter_map(|e| match e {
            ManagerEvent::ConnectionStateChanged(state) => Some(state.clone()),
            _ => None,
         })
         .collect()
   }
}
