//! Peripheral pairing D-Bus service
//!
//! This service scans for nearby peripherals over BlueZ, keeps a ranked list
//! of candidates, and manages a single connection on behalf of onboarding
//! and device-management UIs.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use pairlinkd::{
   bluetooth::{
      bluez::{BluezGate, BluezTransport},
      manager::BluetoothManager,
   },
   config::Config,
   dbus::{PairingService, PairingServiceSignals},
   error::Result,
   event::{EventBus, ManagerEvent},
};

const SERVICE_NAME: &str = "org.pairlinkd";
const OBJECT_PATH: &str = "/org/pairlinkd/manager";

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting pairlinkd D-Bus service...");

   // Load configuration
   let config = Config::load()?;
   info!(
      "Loaded configuration (preferred name: {:?}, ranking: {})",
      config.preferred_name, config.ranking
   );

   // Connect to BlueZ
   let session = bluer::Session::new().await?;
   let transport = BluezTransport::new(&session, config.link_connect_timeout()).await?;
   let gate = BluezGate::new(session.clone(), transport.adapter().clone());

   // Create event channel
   let event_bus = EventProcessor::new();

   // Create Bluetooth manager with event sender and config
   let bluetooth_manager = BluetoothManager::new(transport, gate, config, event_bus.clone());

   // Create D-Bus service
   let service = PairingService::new(bluetooth_manager.clone());

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name(SERVICE_NAME)?
      .serve_at(OBJECT_PATH, service)?
      .build()
      .await?;

   info!("pairlinkd D-Bus service started at {SERVICE_NAME}");

   // Start event processor
   event_bus.spawn_dispatcher(connection).await?;

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down pairlinkd...");
   bluetooth_manager.cleanup().await?;

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<ManagerEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }

   async fn recv(self: &Arc<Self>) -> Option<ManagerEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(&self, iface: &InterfaceRef<PairingService>, event: ManagerEvent) -> Result<()> {
      match event {
         ManagerEvent::ScanStateChanged(state) => {
            iface
               .scan_state_updated(state.name(), state.reason().unwrap_or_default())
               .await?;
         },
         ManagerEvent::DevicesChanged(devices) => {
            let json: Vec<_> = devices.iter().map(|d| d.to_json()).collect();
            iface
               .devices_changed(&serde_json::Value::Array(json).to_string())
               .await?;
         },
         ManagerEvent::ConnectionStateChanged(state) => {
            let address = state.address().map(|a| a.as_str()).unwrap_or_default();
            iface
               .connection_state_updated(
                  state.name(),
                  address,
                  state.reason().unwrap_or_default(),
               )
               .await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, PairingService>(OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: ManagerEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
