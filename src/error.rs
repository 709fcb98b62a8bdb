//! Error types for the schmeep client.
//!
//! This module defines the errors that can end a run: discovery, connection,
//! wire protocol, configuration and I/O failures.

use bluer::Address;
use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

use crate::repl::parser::ProtoError;

/// Main error type for the client.
#[derive(Error, Debug)]
pub enum ClientError {
   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Protocol error: {0}")]
   Protocol(#[from] ProtoError),

   #[error("Invalid device address: {0:?}")]
   InvalidAddress(String),

   #[error("No {name} service ({uuid}) found, probed: {}", list_addresses(.probed))]
   ServiceNotFound {
      name: String,
      uuid: Uuid,
      probed: Vec<Address>,
   },

   #[error("Service {uuid} not found on {address}")]
   ChannelNotFound { address: Address, uuid: Uuid },

   #[error("Connection to {address} on channel {channel} still busy after {attempts} attempts")]
   ConnectBusy {
      address: Address,
      channel: u8,
      attempts: u32,
   },

   #[error("Failed to connect to {address} on channel {channel}: {source}")]
   Connect {
      address: Address,
      channel: u8,
      source: std::io::Error,
   },

   #[error("Input thread panicked")]
   InputPanicked,

   #[error("Task panicked: {0}")]
   TaskPanicked(#[from] JoinError),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

impl ClientError {
   /// Whether the failure happened before a session existed and the user
   /// may want to name the device explicitly.
   pub const fn wants_usage_hint(&self) -> bool {
      matches!(
         self,
         Self::ServiceNotFound { .. } | Self::ChannelNotFound { .. } | Self::InvalidAddress(_)
      )
   }
}

fn list_addresses(addresses: &[Address]) -> String {
   if addresses.is_empty() {
      return "no devices".to_string();
   }
   addresses.iter().map(Address::to_string).collect::<Vec<_>>().join(", ")
}

/// Convenience type alias for Results with `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;
