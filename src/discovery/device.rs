//! Discovered device records and address handling.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::json;
use smol_str::{SmolStr, format_smolstr};

use crate::error::{PairError, Result};

/// Transport-assigned peripheral address, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(SmolStr);

impl DeviceAddress {
   pub fn new(raw: &str) -> Result<Self> {
      let trimmed = raw.trim();
      if trimmed.is_empty() {
         return Err(PairError::InvalidAddress(raw.to_string()));
      }
      Ok(Self(SmolStr::new(trimmed.to_ascii_uppercase())))
   }

   pub fn as_str(&self) -> &str {
      self.0.as_str()
   }

   /// Last `len` characters of the address.
   pub fn suffix(&self, len: usize) -> &str {
      let s = self.0.as_str();
      let count = s.chars().count();
      if len >= count {
         return s;
      }
      let start = s
         .char_indices()
         .nth(count - len)
         .map_or(s.len(), |(idx, _)| idx);
      &s[start..]
   }
}

impl fmt::Display for DeviceAddress {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.0)
   }
}

impl FromStr for DeviceAddress {
   type Err = PairError;

   fn from_str(s: &str) -> Result<Self> {
      Self::new(s)
   }
}

impl TryFrom<String> for DeviceAddress {
   type Error = PairError;

   fn try_from(value: String) -> Result<Self> {
      Self::new(&value)
   }
}

impl From<DeviceAddress> for String {
   fn from(value: DeviceAddress) -> Self {
      value.0.into()
   }
}

/// One raw scan sighting as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
   pub address: DeviceAddress,
   pub name: Option<SmolStr>,
   /// `None` for devices reported without a live reading (bonded list).
   pub signal_strength: Option<i16>,
}

impl Observation {
   /// A live advertisement or inquiry result.
   pub fn live(address: DeviceAddress, name: Option<&str>, signal_strength: i16) -> Self {
      Self {
         address,
         name: name.map(SmolStr::new),
         signal_strength: Some(signal_strength),
      }
   }

   /// A device already known to the platform before scanning started.
   pub fn bonded(address: DeviceAddress, name: Option<&str>) -> Self {
      Self {
         address,
         name: name.map(SmolStr::new),
         signal_strength: None,
      }
   }

   /// The reported name, unless it is missing or blank.
   pub fn real_name(&self) -> Option<&SmolStr> {
      self.name.as_ref().filter(|name| !name.trim().is_empty())
   }
}

/// A deduplicated entry in the ranked device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
   pub address: DeviceAddress,
   /// Display name; a synthesized placeholder when `named` is false.
   pub name: SmolStr,
   pub named: bool,
   pub signal_strength: i16,
   /// Known to the platform before the scan started.
   pub bonded: bool,
   /// A live signal reading has been merged into this entry.
   pub live: bool,
}

impl DiscoveredDevice {
   /// Placeholder shown for devices that never reported a name.
   pub fn placeholder_name(address: &DeviceAddress, suffix_len: usize) -> SmolStr {
      format_smolstr!("Device {}", address.suffix(suffix_len))
   }

   pub(crate) fn from_observation(
      observation: Observation,
      bonded_signal: i16,
      suffix_len: usize,
   ) -> Self {
      let (name, named) = match observation.real_name() {
         Some(name) => (name.clone(), true),
         None => (Self::placeholder_name(&observation.address, suffix_len), false),
      };
      Self {
         name,
         named,
         signal_strength: observation.signal_strength.unwrap_or(bonded_signal),
         bonded: observation.signal_strength.is_none(),
         live: observation.signal_strength.is_some(),
         address: observation.address,
      }
   }

   pub fn to_json(&self) -> serde_json::Value {
      json!({
          "address": self.address.as_str(),
          "name": self.name.as_str(),
          "named": self.named,
          "rssi": self.signal_strength,
          "bonded": self.bonded,
          "live": self.live,
      })
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_address_normalization() {
      let addr = DeviceAddress::new("  aa:bb:cc:dd:ee:0f ").unwrap();
      assert_eq!(addr.as_str(), "AA:BB:CC:DD:EE:0F");
      assert_eq!(addr, "AA:BB:cc:DD:ee:0F".parse().unwrap());
      assert!(DeviceAddress::new("   ").is_err());
   }

   #[test]
   fn test_address_suffix() {
      let addr = DeviceAddress::new("AA:BB:CC:DD:EE:FF").unwrap();
      assert_eq!(addr.suffix(5), "EE:FF");
      assert_eq!(addr.suffix(64), "AA:BB:CC:DD:EE:FF");
      assert_eq!(addr.suffix(0), "");
   }

   #[test]
   fn test_placeholder_is_stable() {
      let addr = DeviceAddress::new("11:22:33:44:55:66").unwrap();
      let first = DiscoveredDevice::from_observation(
         Observation::live(addr.clone(), None, -70),
         0,
         5,
      );
      let second = DiscoveredDevice::from_observation(
         Observation::live(addr.clone(), Some("  "), -40),
         0,
         5,
      );
      assert_eq!(first.name, "Device 55:66");
      assert_eq!(first.name, second.name);
      assert!(!first.named);
      assert!(!second.named);
   }

   #[test]
   fn test_bonded_observation_uses_placeholder_signal() {
      let addr = DeviceAddress::new("11:22:33:44:55:66").unwrap();
      let device =
         DiscoveredDevice::from_observation(Observation::bonded(addr, Some("Kbd-1")), -127, 5);
      assert!(device.bonded);
      assert!(!device.live);
      assert_eq!(device.signal_strength, -127);
      assert_eq!(device.to_json()["name"], "Kbd-1");
   }
}
