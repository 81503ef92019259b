//! Configuration management for the pairing service.
//!
//! This module handles loading and saving configuration from disk,
//! including the preferred device pattern, ranking policy and scan/link
//! timing parameters.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
   discovery::recognition::RankingPolicy,
   error::{PairError, Result},
};

/// Main configuration structure for the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
   /// Name substring ranked ahead of everything else when a scan does not
   /// supply its own pattern. Empty disables the preference.
   #[serde(default = "default_preferred_name")]
   pub preferred_name: String,

   #[serde(default = "default_scan_timeout_ms")]
   pub scan_timeout_ms: u64,

   #[serde(default)]
   pub ranking: RankingPolicy,

   /// Signal strength recorded for bonded devices before a live reading.
   #[serde(default)]
   pub bonded_signal_placeholder: i16,

   #[serde(default = "default_placeholder_suffix_len")]
   pub placeholder_suffix_len: usize,

   #[serde(default = "default_link_teardown_timeout_ms")]
   pub link_teardown_timeout_ms: u64,

   #[serde(default = "default_link_connect_timeout_ms")]
   pub link_connect_timeout_ms: u64,
}

fn default_preferred_name() -> String {
   "DAYLIGHT_KB-1".to_string()
}

const fn default_scan_timeout_ms() -> u64 {
   10_000
}

const fn default_placeholder_suffix_len() -> usize {
   5
}

const fn default_link_teardown_timeout_ms() -> u64 {
   5_000
}

const fn default_link_connect_timeout_ms() -> u64 {
   30_000
}

impl Default for Config {
   fn default() -> Self {
      Self {
         preferred_name: default_preferred_name(),
         scan_timeout_ms: default_scan_timeout_ms(),
         ranking: RankingPolicy::default(),
         bonded_signal_placeholder: 0,
         placeholder_suffix_len: default_placeholder_suffix_len(),
         link_teardown_timeout_ms: default_link_teardown_timeout_ms(),
         link_connect_timeout_ms: default_link_connect_timeout_ms(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      self.save_to(&Self::config_path()?)
   }

   pub fn load_from(config_path: &Path) -> Result<Self> {
      if config_path.exists() {
         let contents = fs::read_to_string(config_path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(config_path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, config_path: &Path) -> Result<()> {
      if let Some(parent) = config_path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(config_path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(home) = env::var("PAIRLINKD_HOME") {
         PathBuf::from(home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else if let Some(dir) = dirs::config_dir() {
         dir
      } else {
         return Err(PairError::ConfigDirNotFound);
      };

      Ok(config_dir.join("pairlinkd").join("config.toml"))
   }

   /// The configured preferred pattern, if any.
   pub fn preferred_pattern(&self) -> Option<&str> {
      let pattern = self.preferred_name.trim();
      (!pattern.is_empty()).then_some(pattern)
   }

   pub const fn scan_timeout(&self) -> Duration {
      Duration::from_millis(self.scan_timeout_ms)
   }

   pub const fn link_teardown_timeout(&self) -> Duration {
      Duration::from_millis(self.link_teardown_timeout_ms)
   }

   pub const fn link_connect_timeout(&self) -> Duration {
      Duration::from_millis(self.link_connect_timeout_ms)
   }
}
