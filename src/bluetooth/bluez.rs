//! BlueZ transport backed by `bluer`.

use std::time::Duration;

use bluer::{
   Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
   DiscoveryTransport, Session,
};
use futures::{Stream, StreamExt, pin_mut};
use log::{debug, info, warn};
use parking_lot::Mutex;
use smol_str::format_smolstr;
use tokio::{task::JoinHandle, time};

use crate::{
   bluetooth::transport::{CapabilityGate, LinkSink, ScanSink, Transport},
   discovery::device::{DeviceAddress, Observation},
   error::{PairError, Result},
};

/// Interval between checks for resolved GATT services
const SERVICE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Number of checks before service discovery is reported as failed
const SERVICE_POLL_ATTEMPTS: u32 = 40;

pub struct BluezTransport {
   adapter: Adapter,
   connect_timeout: Duration,
}

impl BluezTransport {
   pub async fn new(session: &Session, connect_timeout: Duration) -> Result<Self> {
      let adapter = session.default_adapter().await?;
      info!("Using adapter {}", adapter.name());
      Ok(Self {
         adapter,
         connect_timeout,
      })
   }

   pub fn adapter(&self) -> &Adapter {
      &self.adapter
   }

   fn device(&self, address: &DeviceAddress) -> Result<Device> {
      let address: Address = address
         .as_str()
         .parse()
         .map_err(|_| PairError::InvalidAddress(address.to_string()))?;
      Ok(self.adapter.device(address)?)
   }
}

/// Active discovery; discovery stops when the forwarding task ends.
pub struct BluezScan(JoinHandle<()>);

pub struct BluezLink {
   device: Device,
   sink: LinkSink,
   task: JoinHandle<()>,
   services: Mutex<Option<JoinHandle<()>>>,
}

impl Transport for BluezTransport {
   type Subscription = BluezScan;
   type Link = BluezLink;

   async fn bonded_devices(&self) -> Result<Vec<Observation>> {
      let mut bonded = Vec::new();
      for address in self.adapter.device_addresses().await? {
         let device = self.adapter.device(address)?;
         if !device.is_paired().await.unwrap_or(false) {
            continue;
         }
         let name = device.name().await.ok().flatten();
         bonded.push(Observation::bonded(
            DeviceAddress::new(&address.to_string())?,
            name.as_deref(),
         ));
      }
      debug!("Found {} bonded devices", bonded.len());
      Ok(bonded)
   }

   async fn begin_scan(&self, sink: ScanSink) -> Result<BluezScan> {
      let filter = DiscoveryFilter {
         transport: DiscoveryTransport::Auto,
         duplicate_data: true,
         ..Default::default()
      };
      self.adapter.set_discovery_filter(filter).await?;
      let events = self.adapter.discover_devices_with_changes().await?;
      let adapter = self.adapter.clone();
      Ok(BluezScan(tokio::spawn(forward_discovery(adapter, events, sink))))
   }

   async fn end_scan(&self, subscription: BluezScan) -> Result<()> {
      subscription.0.abort();
      let _ = subscription.0.await;
      Ok(())
   }

   fn open_link(&self, address: &DeviceAddress, sink: LinkSink) -> Result<BluezLink> {
      let device = self.device(address)?;
      let task = tokio::spawn(drive_link(device.clone(), sink.clone(), self.connect_timeout));
      Ok(BluezLink {
         device,
         sink,
         task,
         services: Mutex::new(None),
      })
   }

   async fn close_link(&self, link: BluezLink) -> Result<()> {
      link.task.abort();
      let services = link.services.lock().take();
      if let Some(services) = services {
         services.abort();
      }
      // Disconnect also cancels a Connect still pending inside BlueZ.
      if let Err(e) = link.device.disconnect().await {
         if link.device.is_connected().await.unwrap_or(true) {
            return Err(e.into());
         }
         debug!("{} was not connected: {e}", link.device.address());
      }
      Ok(())
   }

   fn discover_services(&self, link: &BluezLink) {
      let device = link.device.clone();
      let sink = link.sink.clone();
      let handle = tokio::spawn(async move {
         match resolve_services(&device).await {
            Ok(count) => sink.services_discovered(count),
            Err(e) => sink.service_discovery_failed(e.to_string()),
         };
      });
      if let Some(previous) = link.services.lock().replace(handle) {
         previous.abort();
      }
   }
}

async fn forward_discovery(
   adapter: Adapter,
   events: impl Stream<Item = AdapterEvent>,
   sink: ScanSink,
) {
   pin_mut!(events);
   while let Some(event) = events.next().await {
      let AdapterEvent::DeviceAdded(address) = event else {
         continue;
      };
      match observe(&adapter, address).await {
         Ok(Some(observation)) => {
            if !sink.observe(observation) {
               return;
            }
         },
         Ok(None) => {},
         Err(e) => debug!("Skipping {address}: {e}"),
      }
   }
   sink.fail("Discovery stream ended");
}

/// Reads a sighting; cached devices without a current RSSI are skipped.
async fn observe(adapter: &Adapter, address: Address) -> Result<Option<Observation>> {
   let device = adapter.device(address)?;
   let Some(rssi) = device.rssi().await? else {
      return Ok(None);
   };
   let name = device.name().await?;
   Ok(Some(Observation::live(
      DeviceAddress::new(&address.to_string())?,
      name.as_deref(),
      rssi,
   )))
}

async fn drive_link(device: Device, sink: LinkSink, connect_timeout: Duration) {
   let events = match device.events().await {
      Ok(events) => events,
      Err(e) => {
         sink.failed(format_smolstr!("Connection failed: {e}"));
         return;
      },
   };

   match time::timeout(connect_timeout, device.connect()).await {
      Ok(Ok(())) => {},
      Ok(Err(e)) => {
         warn!("Failed to connect to {}: {e}", device.address());
         sink.failed(format_smolstr!("Connection failed: {e}"));
         return;
      },
      Err(_) => {
         sink.failed("Connection timed out");
         return;
      },
   }

   if !sink.established() {
      return;
   }

   pin_mut!(events);
   while let Some(event) = events.next().await {
      if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
         break;
      }
   }
   sink.disconnected();
}

async fn resolve_services(device: &Device) -> Result<usize> {
   for _ in 0..SERVICE_POLL_ATTEMPTS {
      if device.is_services_resolved().await? {
         return Ok(device.services().await?.len());
      }
      time::sleep(SERVICE_POLL_INTERVAL).await;
   }
   Err(PairError::RequestTimeout)
}

/// Capability and radio checks against the BlueZ adapter.
pub struct BluezGate {
   session: Session,
   adapter: Adapter,
}

impl BluezGate {
   pub const fn new(session: Session, adapter: Adapter) -> Self {
      Self { session, adapter }
   }
}

impl CapabilityGate for BluezGate {
   // Enumeration fails when D-Bus policy denies access to org.bluez.
   async fn has_required_capabilities(&self) -> bool {
      match self.session.adapter_names().await {
         Ok(names) => {
            let visible = names.iter().any(|name| name == self.adapter.name());
            if !visible {
               warn!("Adapter {} is not visible to this process", self.adapter.name());
            }
            visible
         },
         Err(e) => {
            warn!("BlueZ is not accessible: {e}");
            false
         },
      }
   }

   async fn is_radio_enabled(&self) -> bool {
      self.adapter.is_powered().await.unwrap_or(false)
   }
}
