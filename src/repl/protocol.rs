//! Wire format of the evaluation service.
//!
//! Client to service:
//! ```text
//! [LEN][LEN bytes] ... [CMD_EVALUATE]    LEN in 0..=253
//! [CMD_INTERRUPT]                        at any time
//! ```
//! Service to client:
//! ```text
//! [LEN][LEN bytes]                       LEN in 0..=254
//! [CMD_COMPLETE]
//! ```
//! Payload bytes are never interpreted.

use smallvec::SmallVec;

/// Outbound packet buffer.
pub type Packet = SmallVec<[u8; 32]>;

/// Ends an expression; every block since the previous sentinel belongs to it.
pub const CMD_EVALUATE: u8 = 254;
/// Aborts the evaluation in progress.
pub const CMD_INTERRUPT: u8 = 255;
/// Ends the output of one evaluation.
pub const CMD_COMPLETE: u8 = 255;

/// Largest expression chunk; 254 and 255 are commands.
pub const MAX_BLOCK_LEN: usize = CMD_EVALUATE as usize - 1;
/// Largest output block; 255 is the completion sentinel.
pub const MAX_OUTPUT_BLOCK_LEN: usize = CMD_COMPLETE as usize - 1;

/// Reserved command bytes on the client-to-service direction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
pub enum Command {
   Evaluate = CMD_EVALUATE,
   Interrupt = CMD_INTERRUPT,
}

impl Command {
   pub const fn is_command(byte: u8) -> bool {
      byte > MAX_BLOCK_LEN as u8
   }
}

/// Encodes an expression as length-prefixed chunks followed by
/// `CMD_EVALUATE`. An empty expression is the lone sentinel.
pub fn encode_expression(expr: &[u8]) -> Packet {
   let mut packet = Packet::with_capacity(expr.len() + expr.len() / MAX_BLOCK_LEN + 2);
   for chunk in expr.chunks(MAX_BLOCK_LEN) {
      packet.push(chunk.len() as u8);
      packet.extend_from_slice(chunk);
   }
   packet.push(CMD_EVALUATE);
   packet
}

pub fn interrupt_packet() -> Packet {
   Packet::from_slice(&[CMD_INTERRUPT])
}

/// Encodes evaluation output as blocks of at most `MAX_OUTPUT_BLOCK_LEN`.
pub fn encode_output(output: &[u8]) -> Packet {
   let mut packet = Packet::with_capacity(output.len() + output.len() / MAX_OUTPUT_BLOCK_LEN + 1);
   for chunk in output.chunks(MAX_OUTPUT_BLOCK_LEN) {
      packet.push(chunk.len() as u8);
      packet.extend_from_slice(chunk);
   }
   packet
}

pub fn complete_packet() -> Packet {
   Packet::from_slice(&[CMD_COMPLETE])
}
