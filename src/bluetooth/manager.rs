//! Discovery and connection manager.
//!
//! [`BluetoothManager`] is a cheap handle to a single actor task that owns
//! the scan session, the discovery aggregator and the connection lifecycle.
//! Caller commands arrive on a bounded inbox; transport callbacks and timer
//! expiries arrive on an unbounded loopback channel. Both are handled by one
//! `select!` loop, so every state publication happens in program order.

use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use smol_str::{SmolStr, format_smolstr};
use tokio::{
   select,
   sync::{mpsc, oneshot},
   task::JoinHandle,
   time,
};

use crate::{
   bluetooth::{
      lifecycle::ConnectionLifecycle,
      transport::{CapabilityGate, LinkEvent, ScanSink, Transport},
   },
   config::Config,
   discovery::{
      aggregator::DiscoveryAggregator,
      device::{DeviceAddress, DiscoveredDevice, Observation},
   },
   error::{PairError, Result},
   event::EventSender,
   state::{ConnectionState, ScanState, StatePublisher, StateWatch},
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 64;

const PERMISSIONS_MISSING: &str = "Bluetooth permissions not granted";
const RADIO_DISABLED: &str = "Bluetooth is not enabled";

// === Commands ===

#[derive(Debug)]
pub(crate) enum ManagerCommand {
   // User commands
   StartScan {
      pattern: Option<String>,
      timeout: Option<Duration>,
      reply: oneshot::Sender<()>,
   },
   StopScan(oneshot::Sender<()>),
   Connect(DeviceAddress, oneshot::Sender<()>),
   Disconnect(oneshot::Sender<()>),
   Cleanup(oneshot::Sender<()>),

   // Transport events
   Observed {
      session: u64,
      observations: Vec<Observation>,
   },
   ScanFailed {
      session: u64,
      reason: SmolStr,
   },
   Link {
      attempt: u64,
      event: LinkEvent,
   },

   // Timers
   ScanTimeout {
      session: u64,
   },
}

// === Main Manager ===

/// Handle to the manager actor.
///
/// Commands never fail because of the radio; failures are published as
/// `Error` states. They only return [`PairError::ManagerShutdown`] once the
/// actor has stopped.
#[derive(Clone)]
pub struct BluetoothManager {
   inbox: mpsc::Sender<ManagerCommand>,
   watch: StateWatch,
}

impl BluetoothManager {
   pub fn new<T, G>(transport: T, gate: G, config: Config, events: EventSender) -> Self
   where
      T: Transport,
      G: CapabilityGate,
   {
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let publisher = Arc::new(StatePublisher::new(events));
      let watch = publisher.watch();
      tokio::spawn(ManagerActor::new(config, transport, gate, publisher, command_rx).run());
      Self {
         inbox: command_tx,
         watch,
      }
   }

   async fn request(&self, cmd: impl FnOnce(oneshot::Sender<()>) -> ManagerCommand) -> Result<()> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(cmd(tx))
         .await
         .map_err(|_| PairError::ManagerShutdown)?;
      rx.await.map_err(|_| PairError::ManagerShutdown)
   }

   /// Starts a fresh scan session, stopping any active one first.
   ///
   /// `pattern` overrides the configured preferred name and `timeout` the
   /// configured auto-stop delay.
   pub async fn start_scan(&self, pattern: Option<&str>, timeout: Option<Duration>) -> Result<()> {
      let pattern = pattern.map(str::to_owned);
      self
         .request(|reply| ManagerCommand::StartScan {
            pattern,
            timeout,
            reply,
         })
         .await
   }

   pub async fn stop_scan(&self) -> Result<()> {
      self.request(ManagerCommand::StopScan).await
   }

   /// Stops scanning and connects to `address`, replacing any live link.
   pub async fn connect_to_device(&self, address: DeviceAddress) -> Result<()> {
      self
         .request(|reply| ManagerCommand::Connect(address, reply))
         .await
   }

   pub async fn disconnect(&self) -> Result<()> {
      self.request(ManagerCommand::Disconnect).await
   }

   /// Stops scanning, disconnects and shuts the actor down.
   pub async fn cleanup(&self) -> Result<()> {
      self.request(ManagerCommand::Cleanup).await
   }

   pub fn devices(&self) -> Vec<DiscoveredDevice> {
      self.watch.devices.borrow().clone()
   }

   pub fn scan_state(&self) -> ScanState {
      self.watch.scan.borrow().clone()
   }

   pub fn connection_state(&self) -> ConnectionState {
      self.watch.connection.borrow().clone()
   }

   /// Address of the established connection, if any.
   pub fn connected_address(&self) -> Option<DeviceAddress> {
      match &*self.watch.connection.borrow() {
         ConnectionState::Connected(address) => Some(address.clone()),
         _ => None,
      }
   }

   /// Fresh receivers for all published streams.
   pub fn watch(&self) -> StateWatch {
      self.watch.clone()
   }
}

// === Manager Actor ===

struct ScanSession<S> {
   id: u64,
   subscription: S,
   timer: JoinHandle<()>,
}

struct ManagerActor<T: Transport, G> {
   config: Config,
   transport: Arc<T>,
   gate: G,
   publisher: Arc<StatePublisher>,
   command_rx: mpsc::Receiver<ManagerCommand>,
   loopback_rx: mpsc::UnboundedReceiver<ManagerCommand>,
   loopback_tx: mpsc::UnboundedSender<ManagerCommand>,

   // State
   aggregator: DiscoveryAggregator,
   lifecycle: ConnectionLifecycle<T>,
   scan: Option<ScanSession<T::Subscription>>,
   next_session: u64,
   cleaned_up: bool,
}

impl<T: Transport, G: CapabilityGate> ManagerActor<T, G> {
   fn new(
      config: Config,
      transport: T,
      gate: G,
      publisher: Arc<StatePublisher>,
      command_rx: mpsc::Receiver<ManagerCommand>,
   ) -> Self {
      let (loopback_tx, loopback_rx) = mpsc::unbounded_channel();
      let transport = Arc::new(transport);
      let lifecycle = ConnectionLifecycle::new(
         transport.clone(),
         publisher.clone(),
         loopback_tx.clone(),
         config.link_teardown_timeout(),
      );
      Self {
         aggregator: DiscoveryAggregator::from_config(&config),
         config,
         transport,
         gate,
         publisher,
         command_rx,
         loopback_rx,
         loopback_tx,
         lifecycle,
         scan: None,
         next_session: 0,
         cleaned_up: false,
      }
   }

   async fn run(mut self) {
      info!("Bluetooth manager starting up");

      loop {
         select! {
             cmd = self.command_rx.recv() => {
                 let Some(cmd) = cmd else {
                     info!("Bluetooth manager shutting down");
                     break;
                 };
                 if !self.handle_command(cmd).await {
                     break;
                 }
             }
             Some(cmd) = self.loopback_rx.recv() => {
                 if !self.handle_command(cmd).await {
                     break;
                 }
             }
         }
      }

      if !self.cleaned_up {
         self.cleanup().await;
      }
   }

   async fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
      match cmd {
         ManagerCommand::StartScan {
            pattern,
            timeout,
            reply,
         } => {
            self.start_scan(pattern.as_deref(), timeout).await;
            let _ = reply.send(());
         },
         ManagerCommand::StopScan(reply) => {
            self.stop_scan().await;
            let _ = reply.send(());
         },
         ManagerCommand::Connect(address, reply) => {
            self.connect_to_device(address).await;
            let _ = reply.send(());
         },
         ManagerCommand::Disconnect(reply) => {
            self.lifecycle.disconnect().await;
            let _ = reply.send(());
         },
         ManagerCommand::Cleanup(reply) => {
            self.cleanup().await;
            let _ = reply.send(());
            return false;
         },
         ManagerCommand::Observed {
            session,
            observations,
         } => {
            self.handle_observed(session, observations);
         },
         ManagerCommand::ScanFailed { session, reason } => {
            self.handle_scan_failed(session, reason).await;
         },
         ManagerCommand::Link { attempt, event } => {
            self.lifecycle.on_link_event(attempt, event).await;
         },
         ManagerCommand::ScanTimeout { session } => {
            if self.is_current_session(session) {
               info!("Scan session {session} timed out");
               self.stop_scan().await;
            } else {
               debug!("Ignoring expiry of stale scan session {session}");
            }
         },
      }
      true
   }

   async fn check_preconditions(&self) -> Option<&'static str> {
      if !self.gate.has_required_capabilities().await {
         return Some(PERMISSIONS_MISSING);
      }
      if !self.gate.is_radio_enabled().await {
         return Some(RADIO_DISABLED);
      }
      None
   }

   fn is_current_session(&self, session: u64) -> bool {
      self.scan.as_ref().is_some_and(|scan| scan.id == session)
   }

   // === Scanning ===

   async fn start_scan(&mut self, pattern: Option<&str>, timeout: Option<Duration>) {
      if let Some(reason) = self.check_preconditions().await {
         warn!("Cannot start scan: {reason}");
         if let Some(scan) = self.scan.take() {
            self.release_scan(scan).await;
         }
         self.publisher.publish_scan(ScanState::Error(reason.into()));
         return;
      }

      self.stop_scan().await;

      self.next_session += 1;
      let session = self.next_session;
      self.aggregator.reset();
      self
         .aggregator
         .set_preferred(pattern.or_else(|| self.config.preferred_pattern()));

      let bonded = match self.transport.bonded_devices().await {
         Ok(bonded) => bonded,
         Err(e) => {
            warn!("Failed to list bonded devices: {e}");
            Vec::new()
         },
      };
      let devices = self.aggregator.seed_bonded(bonded);
      self.publisher.publish_devices(devices);

      let sink = ScanSink::new(session, self.loopback_tx.clone());
      match self.transport.begin_scan(sink).await {
         Ok(subscription) => {
            let timeout = timeout.unwrap_or_else(|| self.config.scan_timeout());
            info!("Scan session {session} started ({}ms)", timeout.as_millis());
            self.scan = Some(ScanSession {
               id: session,
               subscription,
               timer: self.schedule_timeout(session, timeout),
            });
            self.publisher.publish_scan(ScanState::Scanning);
         },
         Err(e) => {
            warn!("Failed to start scan: {e}");
            self
               .publisher
               .publish_scan(ScanState::Error(format_smolstr!("Failed to start scan: {e}")));
         },
      }
   }

   fn schedule_timeout(&self, session: u64, after: Duration) -> JoinHandle<()> {
      let loopback = self.loopback_tx.clone();
      tokio::spawn(async move {
         time::sleep(after).await;
         let _ = loopback.send(ManagerCommand::ScanTimeout { session });
      })
   }

   async fn stop_scan(&mut self) {
      if let Some(scan) = self.scan.take() {
         self.release_scan(scan).await;
      }
      if self.publisher.scan_state().is_scanning() {
         self.publisher.publish_scan(ScanState::Idle);
      }
   }

   async fn release_scan(&self, scan: ScanSession<T::Subscription>) {
      scan.timer.abort();
      let teardown = self.config.link_teardown_timeout();
      match time::timeout(teardown, self.transport.end_scan(scan.subscription)).await {
         Ok(Ok(())) => debug!("Scan session {} stopped", scan.id),
         Ok(Err(e)) => warn!("Failed to stop scan session {}: {e}", scan.id),
         Err(_) => warn!("Timed out stopping scan session {}", scan.id),
      }
   }

   fn handle_observed(&mut self, session: u64, observations: Vec<Observation>) {
      if !self.is_current_session(session) {
         debug!(
            "Dropping {} observations from stale scan session {session}",
            observations.len()
         );
         return;
      }

      let mut changed = false;
      for observation in observations {
         let (op, _) = self.aggregator.observe(observation);
         changed |= op.is_updated();
      }
      if changed {
         self.publisher.publish_devices(self.aggregator.devices());
      }
   }

   async fn handle_scan_failed(&mut self, session: u64, reason: SmolStr) {
      if !self.is_current_session(session) {
         debug!("Ignoring failure of stale scan session {session}: {reason}");
         return;
      }
      warn!("Scan session {session} failed: {reason}");
      if let Some(scan) = self.scan.take() {
         self.release_scan(scan).await;
      }
      self
         .publisher
         .publish_scan(ScanState::Error(format_smolstr!("Scan failed: {reason}")));
   }

   // === Connection ===

   async fn connect_to_device(&mut self, address: DeviceAddress) {
      if let Some(reason) = self.check_preconditions().await {
         warn!("Cannot connect to {address}: {reason}");
         self.lifecycle.fail(reason).await;
         return;
      }

      self.stop_scan().await;

      match self.aggregator.lookup(&address) {
         Some(device) => info!("Connecting to {} ({})", device.name, device.address),
         None => info!("Connecting to {address}, not seen in the last scan"),
      }
      self.lifecycle.connect(address).await;
   }

   async fn cleanup(&mut self) {
      info!("Cleaning up Bluetooth manager");
      self.command_rx.close();
      self.stop_scan().await;
      if let Some(address) = self.lifecycle.connected_address() {
         info!("Dropping connection to {address}");
      }
      self.lifecycle.disconnect().await;
      self.cleaned_up = true;
   }
}
