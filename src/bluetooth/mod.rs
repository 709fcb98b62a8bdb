//! Bluetooth layer of the client.
//!
//! This module provides SDP service discovery, the service locator that
//! picks a device, and the RFCOMM transport the session runs on.

use std::str::FromStr;

use bluer::Address;

pub mod locator;
pub mod rfcomm;
pub mod sdp;

/// RFCOMM channel number.
pub type Channel = u8;

/// Length of the canonical `XX:XX:XX:XX:XX:XX` form.
pub const ADDRESS_STR_LEN: usize = 17;

/// Parses a device address in its exact canonical form.
///
/// Anything that is not six colon-separated two-digit hex octets is
/// rejected, including shortened octets that `Address::from_str` alone
/// would accept.
pub fn parse_address(s: &str) -> Option<Address> {
   if s.len() != ADDRESS_STR_LEN {
      return None;
   }
   let well_formed = s.bytes().enumerate().all(|(i, b)| {
      if i % 3 == 2 {
         b == b':'
      } else {
         b.is_ascii_hexdigit()
      }
   });
   if !well_formed {
      return None;
   }
   Address::from_str(s).ok()
}
