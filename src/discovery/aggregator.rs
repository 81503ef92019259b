//! Deduplicating, ranking aggregator for raw scan observations.
//!
//! One entry per address. Repeat sightings only replace an entry when they
//! bring a real name where there was a placeholder, or a strictly stronger
//! signal, so weaker or duplicate beacons do not make the list flap.

use log::debug;

use crate::{
   config::Config,
   discovery::{
      device::{DeviceAddress, DiscoveredDevice, Observation},
      recognition::{PreferredPattern, RankingPolicy},
   },
};

/// Outcome of merging one observation into the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
   /// The existing entry was kept unchanged.
   Noop,
   /// A new address was added.
   Inserted,
   /// An existing entry was replaced or upgraded.
   Updated,
}

impl UpdateOp {
   pub const fn is_updated(&self) -> bool {
      matches!(self, Self::Inserted | Self::Updated)
   }
}

#[derive(Debug, Clone)]
pub struct DiscoveryAggregator {
   devices: Vec<DiscoveredDevice>,
   preferred: Option<PreferredPattern>,
   policy: RankingPolicy,
   bonded_signal: i16,
   suffix_len: usize,
}

impl Default for DiscoveryAggregator {
   fn default() -> Self {
      Self::new(RankingPolicy::default())
   }
}

impl DiscoveryAggregator {
   pub const fn new(policy: RankingPolicy) -> Self {
      Self {
         devices: Vec::new(),
         preferred: None,
         policy,
         bonded_signal: 0,
         suffix_len: 5,
      }
   }

   pub fn from_config(config: &Config) -> Self {
      let mut aggregator = Self::new(config.ranking)
         .bonded_signal_placeholder(config.bonded_signal_placeholder)
         .placeholder_suffix_len(config.placeholder_suffix_len);
      aggregator.set_preferred(config.preferred_pattern());
      aggregator
   }

   pub const fn bonded_signal_placeholder(mut self, signal: i16) -> Self {
      self.bonded_signal = signal;
      self
   }

   pub const fn placeholder_suffix_len(mut self, len: usize) -> Self {
      self.suffix_len = len;
      self
   }

   pub const fn policy(&self) -> RankingPolicy {
      self.policy
   }

   pub const fn preferred(&self) -> Option<&PreferredPattern> {
      self.preferred.as_ref()
   }

   /// Replaces the preferred-name pattern and re-ranks the current list.
   pub fn set_preferred(&mut self, pattern: Option<&str>) {
      self.preferred = pattern.and_then(PreferredPattern::new);
      self.rank();
   }

   /// Clears every known device. Called when a new scan session starts.
   pub fn reset(&mut self) {
      self.devices.clear();
   }

   pub fn devices(&self) -> &[DiscoveredDevice] {
      &self.devices
   }

   pub fn len(&self) -> usize {
      self.devices.len()
   }

   pub fn is_empty(&self) -> bool {
      self.devices.is_empty()
   }

   pub fn lookup(&self, address: &DeviceAddress) -> Option<&DiscoveredDevice> {
      self.devices.iter().find(|d| &d.address == address)
   }

   /// Seeds devices the platform already knows about. They carry the
   /// neutral signal placeholder until a live observation arrives.
   pub fn seed_bonded<I>(&mut self, bonded: I) -> &[DiscoveredDevice]
   where
      I: IntoIterator<Item = Observation>,
   {
      for observation in bonded {
         let observation = Observation {
            signal_strength: None,
            ..observation
         };
         self.merge(observation);
      }
      self.rank();
      &self.devices
   }

   /// Ingests one observation and returns the updated ranked list.
   pub fn observe(&mut self, observation: Observation) -> (UpdateOp, &[DiscoveredDevice]) {
      let op = self.merge(observation);
      if op.is_updated() {
         self.rank();
      }
      (op, &self.devices)
   }

   fn merge(&mut self, observation: Observation) -> UpdateOp {
      let Some(existing) = self
         .devices
         .iter_mut()
         .find(|d| d.address == observation.address)
      else {
         debug!("New device {}", observation.address);
         self.devices.push(DiscoveredDevice::from_observation(
            observation,
            self.bonded_signal,
            self.suffix_len,
         ));
         return UpdateOp::Inserted;
      };

      let name = observation.real_name().cloned();
      let signal = observation.signal_strength;

      if !existing.named
         && let Some(name) = name
      {
         existing.name = name;
         existing.named = true;
         if let Some(signal) = signal {
            existing.signal_strength = signal;
            existing.live = true;
         }
         return UpdateOp::Updated;
      }

      match signal {
         Some(signal) if !existing.live || signal > existing.signal_strength => {
            existing.signal_strength = signal;
            existing.live = true;
            if let Some(name) = name {
               existing.name = name;
               existing.named = true;
            }
            UpdateOp::Updated
         },
         _ => UpdateOp::Noop,
      }
   }

   fn rank(&mut self) {
      if self.policy == RankingPolicy::DiscoveryOrder {
         return;
      }
      let preferred = self.preferred.as_ref();
      let is_preferred =
         |d: &DiscoveredDevice| d.named && preferred.is_some_and(|p| p.matches(&d.name));
      // Stable: equal keys keep their previous relative order.
      self.devices.sort_by(|a, b| {
         is_preferred(b)
            .cmp(&is_preferred(a))
            .then_with(|| b.signal_strength.cmp(&a.signal_strength))
      });
   }
}
