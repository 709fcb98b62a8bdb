//! Incremental decoders for both directions of the wire protocol.
//!
//! Bytes may arrive split at any point, so each decoder keeps its position
//! inside the current block between calls.

use log::debug;
use thiserror::Error;

use crate::repl::protocol::{CMD_COMPLETE, Command};

/// Largest expression the service-side decoder assembles.
pub const MAX_EXPRESSION_LEN: usize = 1 << 20;

/// Error type for wire protocol decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
   /// Declared block length exceeds the receive buffer
   #[error("Block of {len} bytes exceeds receive buffer of {capacity}")]
   BlockTooLarge { len: usize, capacity: usize },

   /// Assembled expression exceeds the size limit
   #[error("Expression exceeds {limit} bytes")]
   ExpressionTooLarge { limit: usize },
}

/// Decoded service-to-client traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseEvent<'a> {
   /// Output bytes, possibly a fragment of a block.
   Output(&'a [u8]),
   /// The evaluation finished.
   Complete,
}

/// Client-side decoder of `[LEN][bytes]` output blocks and `CMD_COMPLETE`.
#[derive(Debug)]
pub struct ResponseDecoder {
   capacity: usize,
   remaining: usize,
}

impl ResponseDecoder {
   pub const fn new(capacity: usize) -> Self {
      Self {
         capacity,
         remaining: 0,
      }
   }

   /// Whether the decoder sits between blocks.
   pub const fn is_idle(&self) -> bool {
      self.remaining == 0
   }

   /// Feeds received bytes, reporting events in wire order.
   ///
   /// After an error the stream is out of sync and must not be fed again.
   pub fn feed<'a>(
      &mut self,
      mut bytes: &'a [u8],
      mut on_event: impl FnMut(ResponseEvent<'a>),
   ) -> Result<(), ProtoError> {
      while let Some((&header, rest)) = bytes.split_first() {
         if self.remaining > 0 {
            let n = self.remaining.min(bytes.len());
            let (block, rest) = bytes.split_at(n);
            on_event(ResponseEvent::Output(block));
            self.remaining -= n;
            bytes = rest;
            continue;
         }

         bytes = rest;
         if header == CMD_COMPLETE {
            on_event(ResponseEvent::Complete);
            continue;
         }
         let len = header as usize;
         if len > self.capacity {
            return Err(ProtoError::BlockTooLarge {
               len,
               capacity: self.capacity,
            });
         }
         self.remaining = len;
      }
      Ok(())
   }
}

/// Decoded client-to-service traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
   Evaluate(Vec<u8>),
   Interrupt,
}

/// Service-side decoder reassembling chunked expressions.
#[derive(Debug, Default)]
pub struct RequestDecoder {
   expression: Vec<u8>,
   remaining: usize,
}

impl RequestDecoder {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn feed(&mut self, mut bytes: &[u8]) -> Result<Vec<RequestEvent>, ProtoError> {
      let mut events = Vec::new();
      while let Some((&header, rest)) = bytes.split_first() {
         if self.remaining > 0 {
            let n = self.remaining.min(bytes.len());
            if self.expression.len() + n > MAX_EXPRESSION_LEN {
               return Err(ProtoError::ExpressionTooLarge {
                  limit: MAX_EXPRESSION_LEN,
               });
            }
            self.expression.extend_from_slice(&bytes[..n]);
            self.remaining -= n;
            bytes = &bytes[n..];
            continue;
         }

         bytes = rest;
         match Command::from_repr(header) {
            Some(Command::Evaluate) => {
               let expression = std::mem::take(&mut self.expression);
               debug!("Expression of {} bytes complete", expression.len());
               events.push(RequestEvent::Evaluate(expression));
            },
            Some(Command::Interrupt) => events.push(RequestEvent::Interrupt),
            None => self.remaining = header as usize,
         }
      }
      Ok(events)
   }
}
