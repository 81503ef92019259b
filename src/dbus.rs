use std::{str::FromStr, time::Duration};

use log::info;
use zbus::{interface, object_server::SignalEmitter};

use crate::{
   bluetooth::manager::BluetoothManager, discovery::device::DeviceAddress, error::PairError,
};

fn failed(e: PairError) -> zbus::fdo::Error {
   zbus::fdo::Error::Failed(e.to_string())
}

pub struct PairingService {
   bluetooth_manager: BluetoothManager,
}

impl PairingService {
   pub const fn new(bluetooth_manager: BluetoothManager) -> Self {
      Self { bluetooth_manager }
   }
}

#[interface(name = "org.pairlinkd.Manager")]
impl PairingService {
   /// Empty `pattern` and zero `timeout_ms` fall back to the configured values.
   async fn start_scan(&self, pattern: String, timeout_ms: u32) -> zbus::fdo::Result<()> {
      let pattern = Some(pattern.as_str()).filter(|p| !p.trim().is_empty());
      let timeout = (timeout_ms > 0).then(|| Duration::from_millis(u64::from(timeout_ms)));
      info!("StartScan requested (pattern: {pattern:?})");
      self
         .bluetooth_manager
         .start_scan(pattern, timeout)
         .await
         .map_err(failed)
   }

   async fn stop_scan(&self) -> zbus::fdo::Result<()> {
      self.bluetooth_manager.stop_scan().await.map_err(failed)
   }

   async fn connect_device(&self, address: String) -> zbus::fdo::Result<()> {
      let address = DeviceAddress::from_str(&address)
         .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
      self
         .bluetooth_manager
         .connect_to_device(address)
         .await
         .map_err(failed)
   }

   async fn disconnect(&self) -> zbus::fdo::Result<()> {
      self.bluetooth_manager.disconnect().await.map_err(failed)
   }

   async fn get_devices(&self) -> String {
      let devices = self
         .bluetooth_manager
         .devices()
         .iter()
         .map(|d| d.to_json())
         .collect();
      serde_json::Value::Array(devices).to_string()
   }

   // Signals
   #[zbus(signal)]
   pub async fn scan_state_updated(
      emitter: &SignalEmitter<'_>,
      state: &str,
      reason: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn devices_changed(emitter: &SignalEmitter<'_>, devices: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn connection_state_updated(
      emitter: &SignalEmitter<'_>,
      state: &str,
      address: &str,
      reason: &str,
   ) -> zbus::Result<()>;

   // Properties for polling-free reads
   #[zbus(property)]
   async fn scan_state(&self) -> String {
      self.bluetooth_manager.scan_state().name().to_owned()
   }

   #[zbus(property)]
   async fn connection_state(&self) -> String {
      self.bluetooth_manager.connection_state().name().to_owned()
   }

   #[zbus(property)]
   async fn connected_address(&self) -> String {
      self
         .bluetooth_manager
         .connected_address()
         .map(|a| a.to_string())
         .unwrap_or_default()
   }
}
