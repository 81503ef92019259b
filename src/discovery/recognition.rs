//! Preferred-device recognition and ranking policy.
//!
//! A scan may name a target device (for example the keyboard an onboarding
//! flow is pairing). Devices whose name contains that pattern, compared
//! case-insensitively, are ranked ahead of everything else.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// How the discovered device list is ordered.
#[derive(
   Debug,
   Clone,
   Copy,
   Default,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RankingPolicy {
   /// Preferred-name matches first, then strongest signal first.
   #[default]
   PreferredThenSignal,
   /// Order of first sighting; the first device found stays on top.
   DiscoveryOrder,
}

/// Case-insensitive substring pattern for the preferred device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferredPattern(SmolStr);

impl PreferredPattern {
   /// Returns `None` for an empty or blank pattern.
   pub fn new(pattern: &str) -> Option<Self> {
      let pattern = pattern.trim();
      if pattern.is_empty() {
         None
      } else {
         Some(Self(pattern.to_lowercase().into()))
      }
   }

   pub fn as_str(&self) -> &str {
      &self.0
   }

   pub fn matches(&self, name: &str) -> bool {
      name.to_lowercase().contains(self.0.as_str())
   }
}
