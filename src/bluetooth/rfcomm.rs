//! RFCOMM transport for the evaluation session.
//!
//! Connecting retries while the remote reports the channel busy, which
//! happens when a previous session is still being torn down on the other
//! side. Any other failure is final.

use std::{
   future::Future,
   io,
   os::fd::{AsRawFd, BorrowedFd},
   time::Duration,
};

use bluer::{
   Address,
   rfcomm::{Socket, SocketAddr, Stream},
};
use log::{debug, info, warn};
use nix::sys::socket::{setsockopt, sockopt};
use tokio::{
   io::{AsyncRead, AsyncWrite},
   time,
};

use crate::{
   bluetooth::Channel,
   error::{ClientError, Result},
};

/// Bounded retry on busy connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
   /// Total attempts, including the first.
   pub attempts: u32,
   pub backoff: Duration,
}

impl Default for RetryPolicy {
   fn default() -> Self {
      Self {
         attempts: 4,
         backoff: Duration::from_secs(4),
      }
   }
}

/// Source of connected byte streams. Each call opens a fresh socket.
pub trait Connector {
   type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

   fn connect(
      &self,
      address: Address,
      channel: Channel,
   ) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Connects real RFCOMM stream sockets through BlueZ.
#[derive(Debug, Default, Clone, Copy)]
pub struct RfcommConnector;

impl Connector for RfcommConnector {
   type Stream = Stream;

   async fn connect(&self, address: Address, channel: Channel) -> io::Result<Stream> {
      let socket = Socket::new()?;
      {
         // SAFETY: the descriptor is owned by `socket`, which outlives the borrow.
         let fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
         setsockopt(&fd, sockopt::ReuseAddr, &true)?;
      }
      socket.connect(SocketAddr::new(address, channel)).await
   }
}

/// A connected session with the remote service.
#[derive(Debug)]
pub struct Session<S> {
   stream: S,
   address: Address,
   channel: Channel,
}

impl<S> Session<S> {
   pub const fn address(&self) -> Address {
      self.address
   }

   pub const fn channel(&self) -> Channel {
      self.channel
   }

   pub fn into_stream(self) -> S {
      self.stream
   }
}

/// Opens a session on `channel` of `address`, retrying busy connects per
/// `policy`.
pub async fn connect<C: Connector>(
   connector: &C,
   address: Address,
   channel: Channel,
   policy: RetryPolicy,
) -> Result<Session<C::Stream>> {
   let attempts = policy.attempts.max(1);
   let mut attempt = 1;
   loop {
      debug!("Connecting to {address} channel {channel} (attempt {attempt}/{attempts})");
      match connector.connect(address, channel).await {
         Ok(stream) => {
            info!("Connected to {address} on channel {channel}");
            return Ok(Session {
               stream,
               address,
               channel,
            });
         },
         Err(e) if e.kind() == io::ErrorKind::ResourceBusy => {
            if attempt >= attempts {
               return Err(ClientError::ConnectBusy {
                  address,
                  channel,
                  attempts,
               });
            }
            warn!(
               "{address} busy, retrying in {}s",
               policy.backoff.as_secs_f32()
            );
            time::sleep(policy.backoff).await;
            attempt += 1;
         },
         Err(source) => {
            return Err(ClientError::Connect {
               address,
               channel,
               source,
            });
         },
      }
   }
}
