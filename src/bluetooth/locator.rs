//! Finding the device that runs the service.
//!
//! Discovery tries the cached address first, then every device BlueZ
//! reports as connected, then the configured fallback list. A device
//! matches when one of its RFCOMM service records carries the expected
//! service name. The RFCOMM channel is then looked up separately with the
//! service UUID.

use std::future::Future;

use bluer::{Adapter, Address, Session};
use log::{debug, info, warn};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::{
   bluetooth::{
      Channel,
      sdp::{self, RFCOMM_UUID, SdpClient, ServiceRecord},
   },
   cache::AddressCache,
   config::Config,
   error::{ClientError, Result},
};

/// Access to the local Bluetooth stack needed for discovery.
pub trait ServiceDirectory {
   /// Addresses with an active baseband connection.
   fn connected_devices(&self) -> impl Future<Output = Vec<Address>> + Send;

   /// Service records of `address` matching `uuid`, all attributes.
   fn search(
      &self,
      address: Address,
      uuid: Uuid,
   ) -> impl Future<Output = sdp::Result<Vec<ServiceRecord>>> + Send;
}

/// Directory backed by BlueZ and native SDP queries.
pub struct BluezDirectory {
   adapter: Option<Adapter>,
}

impl BluezDirectory {
   /// Connects to bluetoothd. Without a daemon or adapter the directory
   /// still answers SDP searches but reports no connected devices.
   pub async fn new() -> Self {
      let adapter = match Session::new().await {
         Ok(session) => match session.default_adapter().await {
            Ok(adapter) => {
               debug!("Using adapter {}", adapter.name());
               Some(adapter)
            },
            Err(e) => {
               warn!("No Bluetooth adapter: {e}");
               None
            },
         },
         Err(e) => {
            warn!("Failed to create Bluetooth session: {e}");
            None
         },
      };
      Self { adapter }
   }
}

impl ServiceDirectory for BluezDirectory {
   async fn connected_devices(&self) -> Vec<Address> {
      let Some(adapter) = &self.adapter else {
         return Vec::new();
      };
      let addresses = match adapter.device_addresses().await {
         Ok(addresses) => addresses,
         Err(e) => {
            warn!("Failed to list devices: {e}");
            return Vec::new();
         },
      };

      let mut connected = Vec::new();
      for addr in addresses {
         if let Ok(device) = adapter.device(addr)
            && device.is_connected().await == Ok(true)
         {
            connected.push(addr);
         }
      }
      connected
   }

   async fn search(&self, address: Address, uuid: Uuid) -> sdp::Result<Vec<ServiceRecord>> {
      let mut client = SdpClient::connect(address).await?;
      client.search(&[uuid]).await
   }
}

/// Where a discovered address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Tier {
   Cache,
   Connected,
   Fallback,
}

type Probed = SmallVec<[Address; 8]>;

/// Resolves the `(address, channel)` pair of the service.
pub struct ServiceLocator<D> {
   directory: D,
   cache: AddressCache,
   service_name: String,
   service_uuid: Uuid,
   fallback: Vec<Address>,
}

impl<D: ServiceDirectory> ServiceLocator<D> {
   pub fn new(directory: D, cache: AddressCache, config: &Config) -> Self {
      Self {
         directory,
         cache,
         service_name: config.service_name.clone(),
         service_uuid: config.service_uuid,
         fallback: config.fallback_addresses(),
      }
   }

   /// Whether `address` advertises an RFCOMM service whose name contains
   /// the expected service name.
   pub async fn probe(&self, address: Address) -> bool {
      debug!("Probing {address}");
      match self.directory.search(address, RFCOMM_UUID).await {
         Ok(records) => records
            .iter()
            .filter_map(ServiceRecord::service_name)
            .any(|name| name.contains(self.service_name.as_str())),
         Err(e) => {
            debug!("SDP search on {address} failed: {e}");
            false
         },
      }
   }

   /// RFCOMM channel of the service on `address`.
   pub async fn channel_for(&self, address: Address) -> Option<Channel> {
      match self.directory.search(address, self.service_uuid).await {
         Ok(records) => records.iter().find_map(ServiceRecord::rfcomm_channel),
         Err(e) => {
            debug!("SDP search for {} on {address} failed: {e}", self.service_uuid);
            None
         },
      }
   }

   /// Walks the discovery tiers and returns the first matching address.
   pub async fn discover(&self) -> Option<(Address, Tier)> {
      self.walk_tiers(&mut SmallVec::new()).await
   }

   /// Tier walk behind [`Self::discover`]. Every address tried is pushed to
   /// `probed`, once.
   async fn walk_tiers(&self, probed: &mut Probed) -> Option<(Address, Tier)> {
      if let Some(cached) = self.cache.load() {
         probed.push(cached);
         if self.probe(cached).await {
            return Some((cached, Tier::Cache));
         }
         info!("Cached device {cached} no longer offers {}", self.service_name);
      }

      let connected = self.directory.connected_devices().await;
      debug!("{} connected device(s)", connected.len());
      for tier in [Tier::Connected, Tier::Fallback] {
         let candidates = match tier {
            Tier::Connected => connected.as_slice(),
            _ => self.fallback.as_slice(),
         };
         for &address in candidates {
            if probed.contains(&address) {
               continue;
            }
            probed.push(address);
            if self.probe(address).await {
               return Some((address, tier));
            }
         }
      }
      None
   }

   /// Discovers the service and its channel, caching the device address.
   pub async fn resolve(&self) -> Result<(Address, Channel)> {
      let mut probed = Probed::new();
      let Some((address, tier)) = self.walk_tiers(&mut probed).await else {
         return Err(ClientError::ServiceNotFound {
            name: self.service_name.clone(),
            uuid: self.service_uuid,
            probed: probed.into_vec(),
         });
      };
      info!("Using discovered device {address} ({tier})");
      self.cache.save(address);

      let channel = self.lookup_channel(address).await?;
      Ok((address, channel))
   }

   /// Resolves the channel on a user-supplied address, caching it.
   pub async fn resolve_address(&self, address: Address) -> Result<Channel> {
      self.cache.save(address);
      self.lookup_channel(address).await
   }

   async fn lookup_channel(&self, address: Address) -> Result<Channel> {
      info!("Searching for service with UUID {}...", self.service_uuid);
      self
         .channel_for(address)
         .await
         .ok_or(ClientError::ChannelNotFound {
            address,
            uuid: self.service_uuid,
         })
   }
}

#[cfg(test)]
mod tests {
   use std::collections::HashMap;

   use parking_lot::Mutex;
   use tempfile::TempDir;

   use super::*;
   use crate::{
      bluetooth::sdp::{DataElement, SdpError, ATTR_PROTOCOL_DESCRIPTOR_LIST, ATTR_SERVICE_NAME_PRIMARY},
      config::SERVICE_UUID,
   };

   const CACHED: Address = Address([0x10, 0, 0, 0, 0, 0x01]);
   const LINKED: Address = Address([0x20, 0, 0, 0, 0, 0x02]);
   const LINKED_OTHER: Address = Address([0x20, 0, 0, 0, 0, 0x03]);
   const FALLBACK: Address = Address([0x30, 0, 0, 0, 0, 0x04]);

   #[derive(Debug, Clone, PartialEq, Eq)]
   enum Call {
      Connected,
      Search(Address, Uuid),
   }

   /// Scripted directory: every device not listed has no SDP server.
   #[derive(Default)]
   struct FakeDirectory {
      connected: Vec<Address>,
      records: HashMap<(Address, Uuid), Vec<ServiceRecord>>,
      calls: Mutex<Vec<Call>>,
   }

   impl FakeDirectory {
      fn with_service(mut self, address: Address, name: &str, channel: Channel) -> Self {
         let named = ServiceRecord::new(vec![(
            ATTR_SERVICE_NAME_PRIMARY,
            DataElement::Text(name.as_bytes().to_vec()),
         )]);
         self.records.insert((address, RFCOMM_UUID), vec![named]);
         let described = ServiceRecord::new(vec![(
            ATTR_PROTOCOL_DESCRIPTOR_LIST,
            DataElement::Sequence(vec![DataElement::Sequence(vec![
               DataElement::Uuid(RFCOMM_UUID),
               DataElement::Unsigned {
                  size: 1,
                  value: u128::from(channel),
               },
            ])]),
         )]);
         self.records.insert((address, SERVICE_UUID), vec![described]);
         self
      }

      fn probes(&self) -> Vec<Address> {
         self
            .calls
            .lock()
            .iter()
            .filter_map(|call| match call {
               Call::Search(addr, uuid) if *uuid == RFCOMM_UUID => Some(*addr),
               _ => None,
            })
            .collect()
      }
   }

   impl ServiceDirectory for FakeDirectory {
      async fn connected_devices(&self) -> Vec<Address> {
         self.calls.lock().push(Call::Connected);
         self.connected.clone()
      }

      async fn search(&self, address: Address, uuid: Uuid) -> sdp::Result<Vec<ServiceRecord>> {
         self.calls.lock().push(Call::Search(address, uuid));
         self
            .records
            .get(&(address, uuid))
            .cloned()
            .ok_or(SdpError::Timeout)
      }
   }

   fn locator(directory: FakeDirectory, tmp: &TempDir, fallback: &[Address]) -> ServiceLocator<FakeDirectory> {
      let config = Config {
         fallback_addresses: fallback.iter().map(Address::to_string).collect(),
         ..Config::default()
      };
      ServiceLocator::new(directory, AddressCache::at(tmp.path().join("schmeep")), &config)
   }

   #[tokio::test]
   async fn test_cached_address_short_circuits() {
      let tmp = TempDir::new().unwrap();
      let directory = FakeDirectory {
         connected: vec![LINKED],
         ..Default::default()
      }
      .with_service(CACHED, "schmeep", 4)
      .with_service(LINKED, "schmeep", 5);
      let locator = locator(directory, &tmp, &[]);
      locator.cache.save(CACHED);

      assert_eq!(locator.resolve().await.unwrap(), (CACHED, 4));
      assert_eq!(
         *locator.directory.calls.lock(),
         vec![Call::Search(CACHED, RFCOMM_UUID), Call::Search(CACHED, SERVICE_UUID)]
      );
   }

   #[tokio::test]
   async fn test_tiers_in_order_and_match_persisted() {
      let tmp = TempDir::new().unwrap();
      let directory = FakeDirectory {
         connected: vec![LINKED_OTHER, LINKED],
         ..Default::default()
      }
      .with_service(LINKED_OTHER, "headset", 1)
      .with_service(FALLBACK, "schmeep", 9);
      let locator = locator(directory, &tmp, &[LINKED, FALLBACK]);
      locator.cache.save(CACHED);

      assert_eq!(locator.discover().await, Some((FALLBACK, Tier::Fallback)));
      // LINKED appears in both tiers but is only probed once.
      assert_eq!(locator.directory.probes(), vec![CACHED, LINKED_OTHER, LINKED, FALLBACK]);
      assert_eq!(locator.directory.calls.lock()[1], Call::Connected);

      assert_eq!(locator.resolve().await.unwrap(), (FALLBACK, 9));
      assert_eq!(locator.cache.load(), Some(FALLBACK));
   }

   #[tokio::test]
   async fn test_name_match_is_case_sensitive_substring() {
      let tmp = TempDir::new().unwrap();
      let directory = FakeDirectory {
         connected: vec![LINKED_OTHER, LINKED],
         ..Default::default()
      }
      .with_service(LINKED_OTHER, "SCHMEEP", 1)
      .with_service(LINKED, "my schmeep repl", 2);
      let locator = locator(directory, &tmp, &[]);

      assert!(!locator.probe(LINKED_OTHER).await);
      assert!(locator.probe(LINKED).await);
      assert_eq!(locator.resolve().await.unwrap(), (LINKED, 2));
      assert_eq!(locator.cache.load(), Some(LINKED));
   }

   #[tokio::test]
   async fn test_exhaustion_is_service_not_found() {
      let tmp = TempDir::new().unwrap();
      let directory = FakeDirectory {
         connected: vec![LINKED],
         ..Default::default()
      };
      let locator = locator(directory, &tmp, &[FALLBACK]);

      locator.cache.save(CACHED);

      let err = locator.resolve().await.unwrap_err();
      match &err {
         ClientError::ServiceNotFound { name, uuid, probed } => {
            assert_eq!(name, "schmeep");
            assert_eq!(*uuid, SERVICE_UUID);
            assert_eq!(probed, &[CACHED, LINKED, FALLBACK]);
         },
         other => panic!("unexpected error: {other}"),
      }
      assert!(err.wants_usage_hint());

      let message = err.to_string();
      assert!(message.contains(&SERVICE_UUID.to_string()));
      for address in [CACHED, LINKED, FALLBACK] {
         assert!(message.contains(&address.to_string()), "{message}");
      }
   }

   #[tokio::test]
   async fn test_explicit_address_is_cached() {
      let tmp = TempDir::new().unwrap();
      let directory = FakeDirectory::default().with_service(LINKED, "schmeep", 7);
      let locator = locator(directory, &tmp, &[]);

      assert_eq!(locator.resolve_address(LINKED).await.unwrap(), 7);
      assert_eq!(locator.cache.load(), Some(LINKED));

      let err = locator.resolve_address(FALLBACK).await.unwrap_err();
      assert!(matches!(err, ClientError::ChannelNotFound { address, uuid } if address == FALLBACK && uuid == SERVICE_UUID));
      assert_eq!(locator.cache.load(), Some(FALLBACK));
   }
}
