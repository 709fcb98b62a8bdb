//! Service Discovery Protocol client.
//!
//! SDP runs over an L2CAP channel on PSM 0x0001. The client only needs the
//! combined ServiceSearchAttribute transaction: send a UUID search pattern
//! plus an attribute range, collect the attribute lists across
//! continuation responses, and decode them into service records.
//!
//! ```text
//! PDU:      [id:1][transaction:2][param_len:2][params...]
//! Request:  [pattern DES][max_bytes:2][attribute-id DES][continuation]
//! Response: [lists_len:2][lists...][continuation]
//! ```
//!
//! Records that fail to decode are skipped; a single malformed record
//! never aborts the scan.

use std::{str, time::Duration};

use bluer::{
   Address, AddressType,
   l2cap::{SeqPacket, Socket, SocketAddr},
};
use log::{debug, warn};
use smallvec::SmallVec;
use thiserror::Error;
use tokio::time;
use uuid::Uuid;

use crate::bluetooth::Channel;

/// PSM of the SDP server
pub const SDP_PSM: u16 = 0x0001;
/// Protocol descriptor list attribute
pub const ATTR_PROTOCOL_DESCRIPTOR_LIST: u16 = 0x0004;
/// Primary-language service name (language base 0x0100 + offset 0)
pub const ATTR_SERVICE_NAME_PRIMARY: u16 = 0x0100;

/// Bluetooth base UUID, `00000000-0000-1000-8000-00805F9B34FB`
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;
/// RFCOMM protocol UUID (0x0003)
pub const RFCOMM_UUID: Uuid = Uuid::from_u128(BASE_UUID | (0x0003u128 << 96));
/// L2CAP protocol UUID (0x0100)
pub const L2CAP_UUID: Uuid = Uuid::from_u128(BASE_UUID | (0x0100u128 << 96));

/// Receive buffer; comfortably above the default L2CAP MTU of 672
const RECV_BUFFER_SIZE: usize = 4096;
/// Timeout for the L2CAP connection to the SDP server
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for one request/response exchange
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
/// Delay before the single retry of a busy SDP connect
const BUSY_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Upper bound on continuation rounds for one search
const MAX_CONTINUATIONS: usize = 64;
/// Continuation state is at most 16 bytes
const MAX_CONTINUATION_LEN: usize = 16;
/// Deepest sequence nesting accepted inside one element
const MAX_NESTING: usize = 32;

/// SDP PDU identifiers used by the client.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
pub enum PduId {
   ErrorResponse = 0x01,
   ServiceSearchRequest = 0x02,
   ServiceSearchResponse = 0x03,
   ServiceAttributeRequest = 0x04,
   ServiceAttributeResponse = 0x05,
   ServiceSearchAttributeRequest = 0x06,
   ServiceSearchAttributeResponse = 0x07,
}

/// Error type for SDP exchanges and decoding.
#[derive(Error, Debug)]
pub enum SdpError {
   #[error("SDP socket error: {0}")]
   Io(#[from] std::io::Error),

   #[error("SDP server did not answer in time")]
   Timeout,

   #[error("Truncated data: expected {expected} bytes, got {actual}")]
   Truncated { expected: usize, actual: usize },

   #[error("Invalid size index {index} for element type {kind}")]
   InvalidSize { kind: u8, index: u8 },

   #[error("Unknown data element type {kind}")]
   UnknownType { kind: u8 },

   #[error("Unexpected PDU 0x{id:02x}")]
   UnexpectedPdu { id: u8 },

   #[error("Transaction mismatch: sent {expected}, got {actual}")]
   TransactionMismatch { expected: u16, actual: u16 },

   #[error("SDP server returned error 0x{code:04x}")]
   ErrorResponse { code: u16 },

   #[error("Continuation state of {len} bytes")]
   InvalidContinuation { len: usize },

   #[error("Malformed service record: {reason}")]
   MalformedRecord { reason: &'static str },

   #[error("Too many continuation rounds")]
   TooManyContinuations,
}

pub type Result<T> = std::result::Result<T, SdpError>;

/// A decoded SDP data element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataElement {
   Nil,
   /// Unsigned integer; `size` is its width in bytes.
   Unsigned {
      size: u8,
      value: u128,
   },
   Signed {
      size: u8,
      value: i128,
   },
   Uuid(Uuid),
   Text(Vec<u8>),
   Bool(bool),
   Sequence(Vec<DataElement>),
   Alternative(Vec<DataElement>),
   Url(Vec<u8>),
}

impl DataElement {
   pub fn as_u8(&self) -> Option<u8> {
      match *self {
         Self::Unsigned { size: 1, value } => Some(value as u8),
         _ => None,
      }
   }

   pub fn as_u16(&self) -> Option<u16> {
      match *self {
         Self::Unsigned { size: 2, value } => Some(value as u16),
         _ => None,
      }
   }

   pub fn as_text(&self) -> Option<&str> {
      match self {
         Self::Text(bytes) => str::from_utf8(bytes).ok(),
         _ => None,
      }
   }

   pub fn as_sequence(&self) -> Option<&[DataElement]> {
      match self {
         Self::Sequence(items) | Self::Alternative(items) => Some(items),
         _ => None,
      }
   }
}

/// Expands a 16- or 32-bit SIG UUID against the Bluetooth base UUID.
pub const fn uuid_from_short(short: u32) -> Uuid {
   Uuid::from_u128(BASE_UUID | ((short as u128) << 96))
}

/// Returns the 16-bit form of `uuid` if it is a SIG-assigned short UUID.
fn uuid_as_short16(uuid: &Uuid) -> Option<u16> {
   let value = uuid.as_u128();
   let short = value >> 96;
   (value & !(0xffff_ffffu128 << 96) == BASE_UUID && short <= 0xffff).then_some(short as u16)
}

/// Splits the next element off `buf`.
///
/// Returns `(type, size index, body, rest)` without decoding the body, so a
/// caller can step over an element whose contents turn out malformed.
fn split_element(buf: &[u8]) -> Result<(u8, u8, &[u8], &[u8])> {
   let (&descriptor, rest) = buf
      .split_first()
      .ok_or(SdpError::Truncated { expected: 1, actual: 0 })?;
   let kind = descriptor >> 3;
   let index = descriptor & 0x07;

   let (len, rest) = match index {
      0 if kind == 0 => (0, rest),
      0..=4 => (1usize << index, rest),
      5 => {
         let (&n, rest) = rest
            .split_first()
            .ok_or(SdpError::Truncated { expected: 1, actual: 0 })?;
         (n as usize, rest)
      },
      6 => {
         let Some((n, rest)) = rest.split_first_chunk::<2>() else {
            return Err(SdpError::Truncated {
               expected: 2,
               actual: rest.len(),
            });
         };
         (u16::from_be_bytes(*n) as usize, rest)
      },
      _ => {
         let Some((n, rest)) = rest.split_first_chunk::<4>() else {
            return Err(SdpError::Truncated {
               expected: 4,
               actual: rest.len(),
            });
         };
         (u32::from_be_bytes(*n) as usize, rest)
      },
   };

   if rest.len() < len {
      return Err(SdpError::Truncated {
         expected: len,
         actual: rest.len(),
      });
   }
   let (body, rest) = rest.split_at(len);
   Ok((kind, index, body, rest))
}

/// Decodes one element from the front of `buf`, returning it with the
/// remaining bytes.
pub fn parse_element(buf: &[u8]) -> Result<(DataElement, &[u8])> {
   parse_nested(buf, 0)
}

fn parse_nested(buf: &[u8], depth: usize) -> Result<(DataElement, &[u8])> {
   let (kind, index, body, rest) = split_element(buf)?;
   let fixed = index <= 4;
   let variable = index >= 5;

   let element = match kind {
      0 if index == 0 => DataElement::Nil,
      1 if fixed => DataElement::Unsigned {
         size: body.len() as u8,
         value: body.iter().fold(0u128, |acc, &b| (acc << 8) | u128::from(b)),
      },
      2 if fixed => {
         let bits = body.len() as u32 * 8;
         let raw = body.iter().fold(0u128, |acc, &b| (acc << 8) | u128::from(b));
         let shift = 128 - bits;
         DataElement::Signed {
            size: body.len() as u8,
            value: ((raw << shift) as i128) >> shift,
         }
      },
      3 => match body.len() {
         2 => uuid_from_short(u32::from(u16::from_be_bytes([body[0], body[1]]))).into(),
         4 => uuid_from_short(u32::from_be_bytes([body[0], body[1], body[2], body[3]])).into(),
         16 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(body);
            Uuid::from_bytes(bytes).into()
         },
         _ => return Err(SdpError::InvalidSize { kind, index }),
      },
      4 if variable => DataElement::Text(body.to_vec()),
      5 if index == 0 => DataElement::Bool(body[0] != 0),
      6 | 7 if variable => {
         if depth >= MAX_NESTING {
            return Err(SdpError::MalformedRecord {
               reason: "nesting too deep",
            });
         }
         let mut items = Vec::new();
         let mut cursor = body;
         while !cursor.is_empty() {
            let (item, rest) = parse_nested(cursor, depth + 1)?;
            items.push(item);
            cursor = rest;
         }
         if kind == 6 {
            DataElement::Sequence(items)
         } else {
            DataElement::Alternative(items)
         }
      },
      8 if variable => DataElement::Url(body.to_vec()),
      0..=8 => return Err(SdpError::InvalidSize { kind, index }),
      _ => return Err(SdpError::UnknownType { kind }),
   };
   Ok((element, rest))
}

impl From<Uuid> for DataElement {
   fn from(uuid: Uuid) -> Self {
      Self::Uuid(uuid)
   }
}

/// A service record: attribute id/value pairs in server order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceRecord {
   attributes: Vec<(u16, DataElement)>,
}

impl ServiceRecord {
   pub fn new(attributes: Vec<(u16, DataElement)>) -> Self {
      Self { attributes }
   }

   /// Decodes the body of a record sequence.
   pub fn parse(mut body: &[u8]) -> Result<Self> {
      let mut attributes = Vec::new();
      while !body.is_empty() {
         let (id, rest) = parse_element(body)?;
         let id = id.as_u16().ok_or(SdpError::MalformedRecord {
            reason: "attribute id is not a 16-bit unsigned integer",
         })?;
         if rest.is_empty() {
            return Err(SdpError::MalformedRecord {
               reason: "attribute id without value",
            });
         }
         let (value, rest) = parse_element(rest)?;
         attributes.push((id, value));
         body = rest;
      }
      Ok(Self { attributes })
   }

   pub fn attribute(&self, id: u16) -> Option<&DataElement> {
      self
         .attributes
         .iter()
         .find(|(attr, _)| *attr == id)
         .map(|(_, value)| value)
   }

   pub fn service_name(&self) -> Option<&str> {
      self.attribute(ATTR_SERVICE_NAME_PRIMARY)?.as_text()
   }

   /// Finds the RFCOMM channel in the protocol descriptor list.
   ///
   /// Each descriptor is a sequence starting with a protocol UUID followed
   /// by its parameters; the channel is the 8-bit parameter that follows
   /// the RFCOMM UUID.
   pub fn rfcomm_channel(&self) -> Option<Channel> {
      let list = self.attribute(ATTR_PROTOCOL_DESCRIPTOR_LIST)?;
      let descriptors = list.as_sequence()?;

      // An alternative wraps several complete descriptor lists.
      let mut lists: SmallVec<[&[DataElement]; 2]> = SmallVec::new();
      match list {
         DataElement::Alternative(_) => lists.extend(descriptors.iter().filter_map(DataElement::as_sequence)),
         _ => lists.push(descriptors),
      }

      for descriptors in lists {
         for descriptor in descriptors {
            let Some(items) = descriptor.as_sequence() else {
               continue;
            };
            let mut protocol = None;
            for item in items {
               match item {
                  DataElement::Uuid(uuid) => protocol = Some(*uuid),
                  _ if protocol == Some(RFCOMM_UUID) => {
                     if let Some(channel) = item.as_u8() {
                        return Some(channel);
                     }
                  },
                  _ => {},
               }
            }
         }
      }
      None
   }
}

/// Decodes the concatenated attribute lists of a search response.
///
/// The outer element is a sequence of record sequences. Records that are
/// not sequences or fail to decode are logged and skipped; a truncated
/// outer list keeps whatever was decoded before the damage.
pub fn parse_attribute_lists(bytes: &[u8]) -> Vec<ServiceRecord> {
   let mut records = Vec::new();
   let mut body = match split_element(bytes) {
      Ok((6, _, body, _)) => body,
      Ok((kind, ..)) => {
         warn!("SDP attribute lists are not a sequence (type {kind})");
         return records;
      },
      Err(e) => {
         warn!("Undecodable SDP attribute lists: {e}");
         return records;
      },
   };

   while !body.is_empty() {
      let (kind, _, record, rest) = match split_element(body) {
         Ok(parts) => parts,
         Err(e) => {
            debug!("Stopping at truncated SDP record: {e}");
            break;
         },
      };
      body = rest;
      if kind != 6 {
         debug!("Skipping SDP record of element type {kind}");
         continue;
      }
      match ServiceRecord::parse(record) {
         Ok(record) => records.push(record),
         Err(e) => debug!("Skipping malformed SDP record: {e}"),
      }
   }
   records
}

fn push_uuid(buf: &mut Vec<u8>, uuid: &Uuid) {
   if let Some(short) = uuid_as_short16(uuid) {
      buf.push(0x19);
      buf.extend_from_slice(&short.to_be_bytes());
   } else {
      buf.push(0x1c);
      buf.extend_from_slice(uuid.as_bytes());
   }
}

/// Builds a ServiceSearchAttributeRequest PDU.
pub fn build_search_attribute_request(
   transaction: u16,
   pattern: &[Uuid],
   range: (u16, u16),
   continuation: &[u8],
) -> Vec<u8> {
   let mut uuids = Vec::with_capacity(pattern.len() * 17);
   for uuid in pattern {
      push_uuid(&mut uuids, uuid);
   }

   let mut params = Vec::with_capacity(uuids.len() + 16 + continuation.len());
   params.push(0x35);
   params.push(uuids.len() as u8);
   params.extend_from_slice(&uuids);
   params.extend_from_slice(&u16::MAX.to_be_bytes());
   params.extend_from_slice(&[0x35, 0x05, 0x0a]);
   params.extend_from_slice(&range.0.to_be_bytes());
   params.extend_from_slice(&range.1.to_be_bytes());
   params.push(continuation.len() as u8);
   params.extend_from_slice(continuation);

   let mut pdu = Vec::with_capacity(5 + params.len());
   pdu.push(PduId::ServiceSearchAttributeRequest as u8);
   pdu.extend_from_slice(&transaction.to_be_bytes());
   pdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
   pdu.extend_from_slice(&params);
   pdu
}

/// Parses a ServiceSearchAttributeResponse PDU.
///
/// Returns the attribute-list bytes carried by this PDU and the
/// continuation state (empty when the response is complete).
pub fn parse_search_attribute_response(transaction: u16, pdu: &[u8]) -> Result<(&[u8], &[u8])> {
   let Some((header, params)) = pdu.split_first_chunk::<5>() else {
      return Err(SdpError::Truncated {
         expected: 5,
         actual: pdu.len(),
      });
   };
   let [id, t0, t1, l0, l1] = *header;
   let actual = u16::from_be_bytes([t0, t1]);
   let param_len = u16::from_be_bytes([l0, l1]) as usize;
   if params.len() < param_len {
      return Err(SdpError::Truncated {
         expected: param_len,
         actual: params.len(),
      });
   }
   let params = &params[..param_len];

   match PduId::from_repr(id) {
      Some(PduId::ErrorResponse) => {
         let code = params
            .first_chunk::<2>()
            .map_or(0, |c| u16::from_be_bytes(*c));
         return Err(SdpError::ErrorResponse { code });
      },
      Some(PduId::ServiceSearchAttributeResponse) => {},
      _ => return Err(SdpError::UnexpectedPdu { id }),
   }
   if actual != transaction {
      return Err(SdpError::TransactionMismatch {
         expected: transaction,
         actual,
      });
   }

   let Some((count, rest)) = params.split_first_chunk::<2>() else {
      return Err(SdpError::Truncated {
         expected: 2,
         actual: params.len(),
      });
   };
   let count = u16::from_be_bytes(*count) as usize;
   if rest.len() < count + 1 {
      return Err(SdpError::Truncated {
         expected: count + 1,
         actual: rest.len(),
      });
   }
   let (lists, rest) = rest.split_at(count);
   let (&cont_len, cont) = rest.split_first().ok_or(SdpError::Truncated {
      expected: 1,
      actual: 0,
   })?;
   let cont_len = cont_len as usize;
   if cont_len > MAX_CONTINUATION_LEN {
      return Err(SdpError::InvalidContinuation { len: cont_len });
   }
   if cont.len() < cont_len {
      return Err(SdpError::Truncated {
         expected: cont_len,
         actual: cont.len(),
      });
   }
   Ok((lists, &cont[..cont_len]))
}

/// An open SDP connection to one remote device.
///
/// The L2CAP socket is closed when the client is dropped, so every exit
/// path of a search releases it.
pub struct SdpClient {
   address: Address,
   socket: SeqPacket,
   transaction: u16,
}

impl SdpClient {
   pub async fn connect(address: Address) -> Result<Self> {
      debug!("Opening SDP session to {address}");
      let socket = match Self::open(address).await {
         Err(SdpError::Io(e)) if e.kind() == std::io::ErrorKind::ResourceBusy => {
            debug!("SDP server on {address} busy, retrying");
            time::sleep(BUSY_RETRY_DELAY).await;
            Self::open(address).await?
         },
         other => other?,
      };
      Ok(Self {
         address,
         socket,
         transaction: rand::random(),
      })
   }

   async fn open(address: Address) -> Result<SeqPacket> {
      let socket = Socket::new_seq_packet()?;
      let addr = SocketAddr::new(address, AddressType::BrEdr, SDP_PSM);
      let seq_packet = time::timeout(CONNECT_TIMEOUT, socket.connect(addr))
         .await
         .map_err(|_| SdpError::Timeout)??;
      Ok(seq_packet)
   }

   /// Runs a ServiceSearchAttribute transaction for `pattern` over the full
   /// attribute range, following continuation states to the end.
   pub async fn search(&mut self, pattern: &[Uuid]) -> Result<Vec<ServiceRecord>> {
      let mut lists = Vec::new();
      let mut continuation: SmallVec<[u8; MAX_CONTINUATION_LEN]> = SmallVec::new();
      let mut buf = [0u8; RECV_BUFFER_SIZE];

      for _ in 0..MAX_CONTINUATIONS {
         self.transaction = self.transaction.wrapping_add(1);
         let request =
            build_search_attribute_request(self.transaction, pattern, (0x0000, 0xffff), &continuation);
         debug!("→ {} SDP: {}", self.address, hex::encode(&request));
         self.socket.send(&request).await?;

         let n = time::timeout(RESPONSE_TIMEOUT, self.socket.recv(&mut buf))
            .await
            .map_err(|_| SdpError::Timeout)??;
         let pdu = &buf[..n];
         debug!("← {} SDP: {}", self.address, hex::encode(pdu));

         let (chunk, next) = parse_search_attribute_response(self.transaction, pdu)?;
         lists.extend_from_slice(chunk);
         if next.is_empty() {
            return Ok(parse_attribute_lists(&lists));
         }
         continuation = SmallVec::from_slice(next);
      }
      Err(SdpError::TooManyContinuations)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   /// Encodes a record the way an SDP server lays it out.
   fn encode_record(name: Option<&str>, channel: Option<u8>) -> Vec<u8> {
      let mut body = Vec::new();
      body.extend_from_slice(&[0x09, 0x00, 0x00, 0x0a, 0x00, 0x01, 0x00, 0x05]);
      if let Some(channel) = channel {
         let descriptors = [
            &[0x35, 0x03, 0x19, 0x01, 0x00][..],
            &[0x35, 0x05, 0x19, 0x00, 0x03, 0x08, channel][..],
         ]
         .concat();
         body.extend_from_slice(&[0x09, 0x00, 0x04, 0x35, descriptors.len() as u8]);
         body.extend_from_slice(&descriptors);
      }
      if let Some(name) = name {
         body.extend_from_slice(&[0x09, 0x01, 0x00, 0x25, name.len() as u8]);
         body.extend_from_slice(name.as_bytes());
      }
      let mut record = vec![0x35, body.len() as u8];
      record.extend_from_slice(&body);
      record
   }

   fn encode_lists(records: &[Vec<u8>]) -> Vec<u8> {
      let body = records.concat();
      let mut out = vec![0x36];
      out.extend_from_slice(&(body.len() as u16).to_be_bytes());
      out.extend_from_slice(&body);
      out
   }

   fn response(transaction: u16, lists: &[u8], continuation: &[u8]) -> Vec<u8> {
      let mut params = (lists.len() as u16).to_be_bytes().to_vec();
      params.extend_from_slice(lists);
      params.push(continuation.len() as u8);
      params.extend_from_slice(continuation);
      let mut pdu = vec![0x07];
      pdu.extend_from_slice(&transaction.to_be_bytes());
      pdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
      pdu.extend_from_slice(&params);
      pdu
   }

   #[test]
   fn test_request_layout_short_uuid() {
      let pdu = build_search_attribute_request(0x0102, &[RFCOMM_UUID], (0x0000, 0xffff), &[]);
      assert_eq!(
         pdu,
         vec![
            0x06, 0x01, 0x02, 0x00, 0x0f, // header
            0x35, 0x03, 0x19, 0x00, 0x03, // pattern
            0xff, 0xff, // max attribute bytes
            0x35, 0x05, 0x0a, 0x00, 0x00, 0xff, 0xff, // attribute range
            0x00, // continuation
         ]
      );
   }

   #[test]
   fn test_request_layout_full_uuid_with_continuation() {
      let uuid = Uuid::from_u128(0x611a1a1a_94ba_11f0_b0a8_5f754c08f133);
      let pdu = build_search_attribute_request(7, &[uuid], (0, 0xffff), &[0xaa, 0xbb]);
      assert_eq!(&pdu[5..8], &[0x35, 0x11, 0x1c]);
      assert_eq!(&pdu[8..24], uuid.as_bytes());
      assert_eq!(&pdu[pdu.len() - 3..], &[0x02, 0xaa, 0xbb]);
      assert_eq!(u16::from_be_bytes([pdu[3], pdu[4]]) as usize, pdu.len() - 5);
   }

   #[test]
   fn test_parse_scalar_elements() {
      let (e, rest) = parse_element(&[0x08, 0x07, 0xff]).unwrap();
      assert_eq!(e.as_u8(), Some(7));
      assert_eq!(rest, &[0xff]);

      let (e, _) = parse_element(&[0x10, 0xfe]).unwrap();
      assert_eq!(e, DataElement::Signed { size: 1, value: -2 });

      let (e, _) = parse_element(&[0x19, 0x00, 0x03]).unwrap();
      assert_eq!(e, DataElement::Uuid(RFCOMM_UUID));

      let (e, _) = parse_element(&[0x1a, 0x00, 0x00, 0x01, 0x00]).unwrap();
      assert_eq!(e, DataElement::Uuid(L2CAP_UUID));

      let (e, _) = parse_element(&[0x25, 0x03, b'a', b'b', b'c']).unwrap();
      assert_eq!(e.as_text(), Some("abc"));

      let (e, _) = parse_element(&[0x28, 0x01]).unwrap();
      assert_eq!(e, DataElement::Bool(true));

      let (e, _) = parse_element(&[0x00]).unwrap();
      assert_eq!(e, DataElement::Nil);
   }

   #[test]
   fn test_parse_rejects_bad_elements() {
      assert!(matches!(
         parse_element(&[0x09, 0x00]),
         Err(SdpError::Truncated { .. })
      ));
      assert!(matches!(
         parse_element(&[0x1b, 0, 0, 0, 0, 0, 0, 0, 0]),
         Err(SdpError::InvalidSize { kind: 3, .. })
      ));
      assert!(matches!(
         parse_element(&[0x78, 0x00]),
         Err(SdpError::UnknownType { kind: 15 })
      ));
      assert!(matches!(
         parse_element(&[0x35, 0x04, 0x08]),
         Err(SdpError::Truncated { .. })
      ));
   }

   #[test]
   fn test_record_name_and_channel() {
      let lists = encode_lists(&[encode_record(Some("schmeep"), Some(7))]);
      let records = parse_attribute_lists(&lists);
      assert_eq!(records.len(), 1);
      assert_eq!(records[0].service_name(), Some("schmeep"));
      assert_eq!(records[0].rfcomm_channel(), Some(7));
   }

   #[test]
   fn test_channel_requires_rfcomm_uint8() {
      // Channel tagged as a 16-bit integer is not a valid RFCOMM channel.
      let record = ServiceRecord::new(vec![(
         ATTR_PROTOCOL_DESCRIPTOR_LIST,
         DataElement::Sequence(vec![DataElement::Sequence(vec![
            DataElement::Uuid(RFCOMM_UUID),
            DataElement::Unsigned { size: 2, value: 7 },
         ])]),
      )]);
      assert_eq!(record.rfcomm_channel(), None);

      // An 8-bit parameter of another protocol is not a channel either.
      let record = ServiceRecord::new(vec![(
         ATTR_PROTOCOL_DESCRIPTOR_LIST,
         DataElement::Sequence(vec![DataElement::Sequence(vec![
            DataElement::Uuid(L2CAP_UUID),
            DataElement::Unsigned { size: 1, value: 3 },
         ])]),
      )]);
      assert_eq!(record.rfcomm_channel(), None);
   }

   #[test]
   fn test_channel_in_alternative_lists() {
      let record = ServiceRecord::new(vec![(
         ATTR_PROTOCOL_DESCRIPTOR_LIST,
         DataElement::Alternative(vec![DataElement::Sequence(vec![
            DataElement::Sequence(vec![DataElement::Uuid(L2CAP_UUID)]),
            DataElement::Sequence(vec![
               DataElement::Uuid(RFCOMM_UUID),
               DataElement::Unsigned { size: 1, value: 12 },
            ]),
         ])]),
      )]);
      assert_eq!(record.rfcomm_channel(), Some(12));
   }

   #[test]
   fn test_malformed_records_are_skipped() {
      let good = encode_record(Some("schmeep"), Some(3));
      // Attribute id encoded as an 8-bit integer.
      let wrong_id = vec![0x35, 0x04, 0x08, 0x01, 0x08, 0x02];
      // Not a sequence at all.
      let not_a_record = vec![0x08, 0x05];
      // Value whose declared length overruns the record.
      let overrun = vec![0x35, 0x05, 0x09, 0x01, 0x00, 0x25, 0x09];
      let lists = encode_lists(&[wrong_id, not_a_record, overrun, good]);

      let records = parse_attribute_lists(&lists);
      assert_eq!(records.len(), 1);
      assert_eq!(records[0].rfcomm_channel(), Some(3));
   }

   /// `levels` sequences, each wrapping the next, around a single uint8.
   fn nested_sequences(levels: usize) -> Vec<u8> {
      let mut element = Vec::with_capacity(levels * 5 + 2);
      for level in 0..levels {
         let inner = (levels - level - 1) * 5 + 2;
         element.push(0x37);
         element.extend_from_slice(&(inner as u32).to_be_bytes());
      }
      element.extend_from_slice(&[0x08, 0x01]);
      element
   }

   #[test]
   fn test_nesting_depth_is_bounded() {
      assert!(parse_element(&nested_sequences(MAX_NESTING)).is_ok());
      assert!(matches!(
         parse_element(&nested_sequences(MAX_NESTING + 1)),
         Err(SdpError::MalformedRecord { .. })
      ));
   }

   #[test]
   fn test_deeply_nested_record_is_skipped() {
      // Attribute 0x0004 whose value nests far beyond the limit.
      let mut body = vec![0x09, 0x00, 0x04];
      body.extend(nested_sequences(40_000));
      let mut hostile = vec![0x37];
      hostile.extend_from_slice(&(body.len() as u32).to_be_bytes());
      hostile.extend_from_slice(&body);

      let good = encode_record(Some("schmeep"), Some(6));
      let mut lists_body = hostile;
      lists_body.extend_from_slice(&good);
      let mut lists = vec![0x37];
      lists.extend_from_slice(&(lists_body.len() as u32).to_be_bytes());
      lists.extend_from_slice(&lists_body);

      let records = parse_attribute_lists(&lists);
      assert_eq!(records.len(), 1);
      assert_eq!(records[0].rfcomm_channel(), Some(6));
   }

   #[test]
   fn test_truncated_lists_keep_decoded_records() {
      let mut lists = encode_lists(&[encode_record(Some("a"), None), encode_record(Some("b"), None)]);
      let cut = lists.len() - 3;
      lists.truncate(cut);
      // Fix the outer length so only the inner record is damaged.
      let body_len = (lists.len() - 3) as u16;
      lists[1..3].copy_from_slice(&body_len.to_be_bytes());

      let records = parse_attribute_lists(&lists);
      assert_eq!(records.len(), 1);
      assert_eq!(records[0].service_name(), Some("a"));
   }

   #[test]
   fn test_response_with_continuation() {
      let pdu = response(9, &[0x35, 0x00], &[0x01, 0x02]);
      let (lists, cont) = parse_search_attribute_response(9, &pdu).unwrap();
      assert_eq!(lists, &[0x35, 0x00]);
      assert_eq!(cont, &[0x01, 0x02]);

      let pdu = response(9, &[], &[]);
      let (lists, cont) = parse_search_attribute_response(9, &pdu).unwrap();
      assert!(lists.is_empty());
      assert!(cont.is_empty());
   }

   #[test]
   fn test_response_errors() {
      let pdu = response(9, &[], &[]);
      assert!(matches!(
         parse_search_attribute_response(8, &pdu),
         Err(SdpError::TransactionMismatch {
            expected: 8,
            actual: 9
         })
      ));

      let error = [0x01, 0x00, 0x09, 0x00, 0x02, 0x00, 0x03];
      assert!(matches!(
         parse_search_attribute_response(9, &error),
         Err(SdpError::ErrorResponse { code: 3 })
      ));

      let other = [0x03, 0x00, 0x09, 0x00, 0x00];
      assert!(matches!(
         parse_search_attribute_response(9, &other),
         Err(SdpError::UnexpectedPdu { id: 0x03 })
      ));

      let long_cont = response(9, &[], &[0u8; 17]);
      assert!(matches!(
         parse_search_attribute_response(9, &long_cont),
         Err(SdpError::InvalidContinuation { len: 17 })
      ));
   }

   #[test]
   fn test_lists_reassembled_across_continuations() {
      let lists = encode_lists(&[encode_record(Some("schmeep"), Some(5))]);
      let (first, second) = lists.split_at(lists.len() / 2);

      let mut collected = Vec::new();
      let pdu = response(1, first, &[0x42]);
      let (chunk, cont) = parse_search_attribute_response(1, &pdu).unwrap();
      collected.extend_from_slice(chunk);
      assert_eq!(cont, &[0x42]);
      let pdu = response(2, second, &[]);
      let (chunk, cont) = parse_search_attribute_response(2, &pdu).unwrap();
      collected.extend_from_slice(chunk);
      assert!(cont.is_empty());

      let records = parse_attribute_lists(&collected);
      assert_eq!(records[0].rfcomm_channel(), Some(5));
   }

   #[test]
   fn test_short_uuid_roundtrip() {
      assert_eq!(uuid_as_short16(&RFCOMM_UUID), Some(0x0003));
      assert_eq!(uuid_as_short16(&uuid_from_short(0x1101)), Some(0x1101));
      assert_eq!(uuid_as_short16(&uuid_from_short(0x0001_0000)), None);
      assert_eq!(
         uuid_as_short16(&Uuid::from_u128(0x611a1a1a_94ba_11f0_b0a8_5f754c08f133)),
         None
      );
   }
}
