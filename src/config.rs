//! Configuration management for the client.
//!
//! This module handles loading and saving the TOML configuration: the
//! service to look for, the static fallback device list and connection
//! parameters.

use std::{
   env,
   ffi::OsString,
   fs,
   path::{Path, PathBuf},
   time::Duration,
};

use bluer::Address;
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
   bluetooth::{parse_address, rfcomm::RetryPolicy},
   error::{ClientError, Result},
   repl::protocol::MAX_OUTPUT_BLOCK_LEN,
};

/// UUID the schmeep service registers its RFCOMM record under.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x611a1a1a_94ba_11f0_b0a8_5f754c08f133);

/// Main configuration structure for the client.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
   #[serde(default = "default_service_name")]
   pub service_name: String,

   #[serde(default = "default_service_uuid")]
   pub service_uuid: Uuid,

   /// Devices probed when neither the cache nor the active connections
   /// lead to the service.
   #[serde(default)]
   pub fallback_addresses: Vec<String>,

   #[serde(default = "default_connect_attempts")]
   pub connect_attempts: u32,

   #[serde(default = "default_connect_backoff")]
   pub connect_backoff_sec: u64,

   #[serde(default = "default_receive_buffer")]
   pub receive_buffer: usize,

   #[serde(default = "default_prompt")]
   pub prompt: String,
}

fn default_service_name() -> String {
   "schmeep".to_string()
}

const fn default_service_uuid() -> Uuid {
   SERVICE_UUID
}

const fn default_connect_attempts() -> u32 {
   4
}

const fn default_connect_backoff() -> u64 {
   4
}

const fn default_receive_buffer() -> usize {
   254
}

fn default_prompt() -> String {
   "scheme> ".to_string()
}

impl Default for Config {
   fn default() -> Self {
      Self {
         service_name: default_service_name(),
         service_uuid: default_service_uuid(),
         fallback_addresses: vec![],
         connect_attempts: default_connect_attempts(),
         connect_backoff_sec: default_connect_backoff(),
         receive_buffer: default_receive_buffer(),
         prompt: default_prompt(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   ///
   /// Without a config directory, or with an unreadable file, the defaults
   /// are used. Only a file that exists and fails to parse is an error.
   pub fn load() -> Result<Self> {
      Self::load_with(|key| env::var_os(key))
   }

   fn load_with(var: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
      match Self::config_path(var) {
         Ok(path) => Self::load_from(&path),
         Err(e) => {
            warn!("{e}, using default configuration");
            Ok(Self::default())
         },
      }
   }

   /// Loads `path`, writing the defaults there when it does not exist.
   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         match fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) => {
               warn!("Could not read {}: {e}, using default configuration", path.display());
               Ok(Self::default())
            },
         }
      } else {
         let config = Self::default();
         if let Err(e) = config.save_to(path) {
            warn!("Could not write default config to {}: {e}", path.display());
         }
         Ok(config)
      }
   }

   /// Saves the current configuration to `path`.
   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path(var: impl Fn(&str) -> Option<OsString>) -> Result<PathBuf> {
      let config_dir = if let Some(schmeep_home) = var("SCHMEEP_HOME") {
         PathBuf::from(schmeep_home)
      } else if let Some(config_home) = var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home).join("schmeep")
      } else if let Some(home) = var("HOME") {
         PathBuf::from(home).join(".config").join("schmeep")
      } else {
         return Err(ClientError::ConfigDirNotFound);
      };

      Ok(config_dir.join("config.toml"))
   }

   /// Parses the fallback list, dropping entries that are not canonical
   /// addresses.
   pub fn fallback_addresses(&self) -> Vec<Address> {
      self
         .fallback_addresses
         .iter()
         .filter_map(|s| {
            let addr = parse_address(s);
            if addr.is_none() {
               warn!("Ignoring malformed fallback address {s:?}");
            }
            addr
         })
         .collect()
   }

   pub fn retry_policy(&self) -> RetryPolicy {
      RetryPolicy {
         attempts: self.connect_attempts.max(1),
         backoff: Duration::from_secs(self.connect_backoff_sec),
      }
   }

   /// Largest inbound block the client accepts. Clamped to what a length
   /// byte can express next to the completion sentinel.
   pub fn receive_buffer(&self) -> usize {
      self.receive_buffer.min(MAX_OUTPUT_BLOCK_LEN)
   }
}
