//! Last-used device address, persisted across runs.
//!
//! The cache is a single line holding the canonical address text. Every
//! failure here is logged and swallowed: a broken cache only costs a
//! rediscovery.

use std::{
   fs::{self, File},
   io::{self, BufRead, BufReader},
   path::PathBuf,
};

use bluer::Address;
use log::{debug, warn};

use crate::bluetooth::{ADDRESS_STR_LEN, parse_address};

const CACHE_FILE: &str = "mac-address.txt";

/// File-backed cache of the last device address.
#[derive(Debug, Clone)]
pub struct AddressCache {
   dir: Option<PathBuf>,
}

impl AddressCache {
   /// Cache rooted at an explicit directory.
   pub fn at(dir: impl Into<PathBuf>) -> Self {
      Self {
         dir: Some(dir.into()),
      }
   }

   /// Cache under `~/.cache/schmeep`. Without a home directory the cache
   /// is disabled.
   pub fn for_user() -> Self {
      let dir = dirs::home_dir().map(|home| home.join(".cache").join("schmeep"));
      if dir.is_none() {
         debug!("No home directory, address cache disabled");
      }
      Self { dir }
   }

   /// Cache that never stores anything.
   #[cfg(test)]
   pub const fn disabled() -> Self {
      Self { dir: None }
   }

   pub fn path(&self) -> Option<PathBuf> {
      self.dir.as_ref().map(|dir| dir.join(CACHE_FILE))
   }

   /// Returns the cached address, if a valid one is stored.
   pub fn load(&self) -> Option<Address> {
      let path = self.path()?;
      let file = match File::open(&path) {
         Ok(file) => file,
         Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No cached address at {}", path.display());
            return None;
         },
         Err(e) => {
            warn!("Could not open {}: {e}", path.display());
            return None;
         },
      };

      let mut line = String::new();
      if let Err(e) = BufReader::new(file).read_line(&mut line) {
         warn!("Could not read {}: {e}", path.display());
         return None;
      }
      let line = line.strip_suffix('\n').unwrap_or(&line);

      if line.len() != ADDRESS_STR_LEN {
         debug!("Ignoring cached address of length {}", line.len());
         return None;
      }
      let address = parse_address(line);
      if address.is_none() {
         warn!("Ignoring malformed cached address {line:?}");
      }
      address
   }

   /// Stores `address`, replacing whatever was cached.
   pub fn save(&self, address: Address) {
      let Some(dir) = &self.dir else {
         return;
      };
      if let Err(e) = fs::create_dir(dir)
         && e.kind() != io::ErrorKind::AlreadyExists
      {
         // Only the leaf directory is created.
         warn!("Could not create cache directory {}: {e}", dir.display());
         return;
      }
      let path = dir.join(CACHE_FILE);
      match fs::write(&path, format!("{address}\n")) {
         Ok(()) => debug!("Cached {address} in {}", path.display()),
         Err(e) => warn!("Could not write {}: {e}", path.display()),
      }
   }
}
