//! Single-flight connection lifecycle.
//!
//! At most one link handle exists at any time. Opening a new link always
//! closes and releases the previous one first, and every path into
//! `Disconnected` or `Error` releases the handle by passing it to
//! [`Transport::close_link`]. Link events carry the attempt id of the link
//! that produced them; events of superseded attempts are dropped.

use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use smol_str::{SmolStr, format_smolstr};
use tokio::{sync::mpsc, time};

use crate::{
   bluetooth::{
      manager::ManagerCommand,
      transport::{LinkEvent, LinkSink, Transport},
   },
   discovery::device::DeviceAddress,
   error::{PairError, Result},
   state::{ConnectionState, StatePublisher},
};

struct ActiveLink<L> {
   attempt: u64,
   address: DeviceAddress,
   established: bool,
   link: L,
}

pub struct ConnectionLifecycle<T: Transport> {
   transport: Arc<T>,
   publisher: Arc<StatePublisher>,
   loopback_tx: mpsc::UnboundedSender<ManagerCommand>,
   current: Option<ActiveLink<T::Link>>,
   next_attempt: u64,
   teardown_timeout: Duration,
}

impl<T: Transport> ConnectionLifecycle<T> {
   pub(crate) const fn new(
      transport: Arc<T>,
      publisher: Arc<StatePublisher>,
      loopback_tx: mpsc::UnboundedSender<ManagerCommand>,
      teardown_timeout: Duration,
   ) -> Self {
      Self {
         transport,
         publisher,
         loopback_tx,
         current: None,
         next_attempt: 0,
         teardown_timeout,
      }
   }

   /// Address of the established link, if any.
   pub fn connected_address(&self) -> Option<&DeviceAddress> {
      self
         .current
         .as_ref()
         .filter(|active| active.established)
         .map(|active| &active.address)
   }

   pub const fn has_link(&self) -> bool {
      self.current.is_some()
   }

   /// Tears down any live link, then starts a new attempt to `address`.
   pub async fn connect(&mut self, address: DeviceAddress) {
      if let Some(previous) = self.current.take() {
         info!(
            "Releasing link to {} before connecting to {address}",
            previous.address
         );
         let established = previous.established;
         if let Err(e) = self.close(previous).await {
            warn!("Teardown of previous link failed: {e}");
         }
         let terminal = if established {
            ConnectionState::Disconnected
         } else {
            ConnectionState::Error(format_smolstr!("Superseded by {address}"))
         };
         self.publisher.publish_connection(terminal);
      }

      self.next_attempt += 1;
      let attempt = self.next_attempt;
      self
         .publisher
         .publish_connection(ConnectionState::Connecting(address.clone()));

      let sink = LinkSink::new(attempt, self.loopback_tx.clone());
      match self.transport.open_link(&address, sink) {
         Ok(link) => {
            debug!("Link attempt {attempt} to {address} started");
            self.current = Some(ActiveLink {
               attempt,
               address,
               established: false,
               link,
            });
         },
         Err(e) => {
            warn!("Failed to open link to {address}: {e}");
            self
               .publisher
               .publish_connection(ConnectionState::Error(format_smolstr!(
                  "Connection failed: {e}"
               )));
         },
      }
   }

   /// Applies a link event. Events from superseded attempts are ignored.
   pub async fn on_link_event(&mut self, attempt: u64, event: LinkEvent) {
      let Some(active) = self.current.as_mut().filter(|a| a.attempt == attempt) else {
         debug!("Ignoring {event:?} from superseded link attempt {attempt}");
         return;
      };

      match event {
         LinkEvent::Established => {
            if active.established {
               return;
            }
            active.established = true;
            info!("Connected to {}", active.address);
            self
               .publisher
               .publish_connection(ConnectionState::Connected(active.address.clone()));
            self.transport.discover_services(&active.link);
         },
         LinkEvent::Disconnected => {
            let terminal = if active.established {
               info!("Link to {} closed by peer", active.address);
               ConnectionState::Disconnected
            } else {
               warn!("Link to {} lost before it was established", active.address);
               ConnectionState::Error(SmolStr::new_static("Connection lost"))
            };
            self.release().await;
            self.publisher.publish_connection(terminal);
         },
         LinkEvent::Failed(reason) => {
            warn!("Link to {} failed: {reason}", active.address);
            self.release().await;
            self
               .publisher
               .publish_connection(ConnectionState::Error(reason));
         },
         LinkEvent::ServicesDiscovered(count) => {
            info!("Discovered {count} services on {}", active.address);
         },
         LinkEvent::ServiceDiscoveryFailed(reason) => {
            warn!("Service discovery on {} failed: {reason}", active.address);
         },
      }
   }

   /// Closes the live link, if any. The handle is released even when the
   /// transport reports a teardown error.
   pub async fn disconnect(&mut self) {
      match self.current.take() {
         Some(active) => {
            let address = active.address.clone();
            match self.close(active).await {
               Ok(()) => {
                  info!("Disconnected from {address}");
                  self
                     .publisher
                     .publish_connection(ConnectionState::Disconnected);
               },
               Err(e) => {
                  warn!("Disconnect from {address} failed: {e}");
                  self
                     .publisher
                     .publish_connection(ConnectionState::Error(format_smolstr!(
                        "Disconnect failed: {e}"
                     )));
               },
            }
         },
         None => {
            if self.publisher.connection_state() != ConnectionState::Disconnected {
               self
                  .publisher
                  .publish_connection(ConnectionState::Disconnected);
            }
         },
      }
   }

   /// Releases any live link and publishes `Error(reason)`.
   pub async fn fail(&mut self, reason: impl Into<SmolStr>) {
      self.release().await;
      self
         .publisher
         .publish_connection(ConnectionState::Error(reason.into()));
   }

   async fn release(&mut self) {
      if let Some(active) = self.current.take() {
         let address = active.address.clone();
         if let Err(e) = self.close(active).await {
            debug!("Ignoring teardown error for {address}: {e}");
         }
      }
   }

   async fn close(&self, active: ActiveLink<T::Link>) -> Result<()> {
      time::timeout(self.teardown_timeout, self.transport.close_link(active.link))
         .await
         .map_err(|_| PairError::RequestTimeout)?
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::bluetooth::mock::{MockTransport, RecordingBus};
   use crate::event::{EventSender, NullEventBus};

   fn addr(s: &str) -> DeviceAddress {
      DeviceAddress::new(s).unwrap()
   }

   fn setup(
      transport: &MockTransport,
   ) -> (
      ConnectionLifecycle<MockTransport>,
      Arc<StatePublisher>,
      mpsc::UnboundedReceiver<ManagerCommand>,
   ) {
      setup_with_bus(transport, Arc::new(NullEventBus))
   }

   fn setup_with_bus(
      transport: &MockTransport,
      events: EventSender,
   ) -> (
      ConnectionLifecycle<MockTransport>,
      Arc<StatePublisher>,
      mpsc::UnboundedReceiver<ManagerCommand>,
   ) {
      let publisher = Arc::new(StatePublisher::new(events));
      let (tx, rx) = mpsc::unbounded_channel();
      let lifecycle = ConnectionLifecycle::new(
         Arc::new(transport.clone()),
         publisher.clone(),
         tx,
         Duration::from_secs(1),
      );
      (lifecycle, publisher, rx)
   }

   #[tokio::test]
   async fn test_connect_then_establish() {
      let transport = MockTransport::default();
      let (mut lifecycle, publisher, _rx) = setup(&transport);

      lifecycle.connect(addr("AA:01")).await;
      assert_eq!(
         publisher.connection_state(),
         ConnectionState::Connecting(addr("AA:01"))
      );
      assert!(lifecycle.connected_address().is_none());

      let attempt = transport.link_sink(&addr("AA:01")).unwrap().attempt();
      lifecycle.on_link_event(attempt, LinkEvent::Established).await;
      assert_eq!(
         publisher.connection_state(),
         ConnectionState::Connected(addr("AA:01"))
      );
      assert_eq!(lifecycle.connected_address(), Some(&addr("AA:01")));
      assert_eq!(transport.service_discoveries(), vec![addr("AA:01")]);
   }

   #[tokio::test]
   async fn test_superseded_attempt_is_ignored() {
      let transport = MockTransport::default();
      let (mut lifecycle, publisher, _rx) = setup(&transport);

      lifecycle.connect(addr("BB:02")).await;
      let stale = transport.link_sink(&addr("BB:02")).unwrap().attempt();
      lifecycle.connect(addr("AA:01")).await;
      assert_eq!(transport.live_links(), vec![addr("AA:01")]);

      lifecycle.on_link_event(stale, LinkEvent::Established).await;
      assert_eq!(
         publisher.connection_state(),
         ConnectionState::Connecting(addr("AA:01"))
      );
      lifecycle
         .on_link_event(stale, LinkEvent::Failed("late".into()))
         .await;
      assert!(lifecycle.has_link());
   }

   #[tokio::test]
   async fn test_superseded_attempt_gets_terminal_state() {
      let transport = MockTransport::default();
      let bus = Arc::new(RecordingBus::default());
      let (mut lifecycle, _publisher, _rx) = setup_with_bus(&transport, bus.clone());

      lifecycle.connect(addr("BB:02")).await;
      lifecycle.connect(addr("AA:01")).await;
      let attempt = transport.link_sink(&addr("AA:01")).unwrap().attempt();
      lifecycle.on_link_event(attempt, LinkEvent::Established).await;

      assert_eq!(
         bus.connection_states(),
         vec![
            ConnectionState::Connecting(addr("BB:02")),
            ConnectionState::Error("Superseded by AA:01".into()),
            ConnectionState::Connecting(addr("AA:01")),
            ConnectionState::Connected(addr("AA:01")),
         ]
      );
   }

   #[tokio::test]
   async fn test_replacing_established_link_disconnects_it() {
      let transport = MockTransport::default();
      let bus = Arc::new(RecordingBus::default());
      let (mut lifecycle, _publisher, _rx) = setup_with_bus(&transport, bus.clone());

      lifecycle.connect(addr("BB:02")).await;
      let attempt = transport.link_sink(&addr("BB:02")).unwrap().attempt();
      lifecycle.on_link_event(attempt, LinkEvent::Established).await;
      lifecycle.connect(addr("AA:01")).await;

      assert_eq!(
         bus.connection_states(),
         vec![
            ConnectionState::Connecting(addr("BB:02")),
            ConnectionState::Connected(addr("BB:02")),
            ConnectionState::Disconnected,
            ConnectionState::Connecting(addr("AA:01")),
         ]
      );
      assert_eq!(transport.live_links(), vec![addr("AA:01")]);
   }

   #[tokio::test]
   async fn test_lost_before_established_is_error() {
      let transport = MockTransport::default();
      let bus = Arc::new(RecordingBus::default());
      let (mut lifecycle, _publisher, _rx) = setup_with_bus(&transport, bus.clone());

      lifecycle.connect(addr("AA:01")).await;
      let attempt = transport.link_sink(&addr("AA:01")).unwrap().attempt();
      lifecycle.on_link_event(attempt, LinkEvent::Disconnected).await;

      assert_eq!(
         bus.connection_states(),
         vec![
            ConnectionState::Connecting(addr("AA:01")),
            ConnectionState::Error("Connection lost".into()),
         ]
      );
      assert!(transport.live_links().is_empty());
   }

   #[tokio::test]
   async fn test_fail_releases_link() {
      let transport = MockTransport::default();
      let (mut lifecycle, publisher, _rx) = setup(&transport);

      lifecycle.connect(addr("AA:01")).await;
      lifecycle.fail("Bluetooth is not enabled").await;
      assert!(!lifecycle.has_link());
      assert!(transport.live_links().is_empty());
      assert_eq!(
         publisher.connection_state(),
         ConnectionState::Error("Bluetooth is not enabled".into())
      );
   }

   #[tokio::test]
   async fn test_disconnect_from_error_acknowledges() {
      let transport = MockTransport::default();
      let (mut lifecycle, publisher, _rx) = setup(&transport);

      lifecycle.fail("boom").await;
      lifecycle.disconnect().await;
      assert_eq!(publisher.connection_state(), ConnectionState::Disconnected);
      assert!(transport.closed().is_empty());
   }
}
