//! Interrupt requests for the network loop.
//!
//! SIGINT is taken through `tokio::signal`, whose handler only records the
//! signal and pokes the runtime's self-pipe. Requests coalesce: several
//! raises before the loop gets to them yield a single interrupt.

use std::io;

use tokio::{
   signal::unix::{Signal, SignalKind, signal},
   sync::mpsc,
};

enum Source {
   Signal(Signal),
   Channel(mpsc::Receiver<()>),
}

/// Stream of interrupt requests.
pub struct Interrupts {
   source: Source,
}

/// Raises interrupts on a channel-backed [`Interrupts`].
#[derive(Debug, Clone)]
pub struct InterruptHandle {
   tx: mpsc::Sender<()>,
}

impl InterruptHandle {
   pub fn raise(&self) {
      // A full slot already holds an unobserved interrupt.
      let _ = self.tx.try_send(());
   }
}

impl Interrupts {
   /// Interrupts raised by SIGINT. Installing the handler replaces the
   /// default disposition, so Ctrl-C no longer terminates the process.
   pub fn from_sigint() -> io::Result<Self> {
      Ok(Self {
         source: Source::Signal(signal(SignalKind::interrupt())?),
      })
   }

   /// Interrupts raised through the returned handle.
   pub fn channel() -> (InterruptHandle, Self) {
      let (tx, rx) = mpsc::channel(1);
      (
         InterruptHandle { tx },
         Self {
            source: Source::Channel(rx),
         },
      )
   }

   /// Waits for the next interrupt. `None` once no more can arrive.
   pub async fn recv(&mut self) -> Option<()> {
      match &mut self.source {
         Source::Signal(signal) => signal.recv().await,
         Source::Channel(rx) => rx.recv().await,
      }
   }
}
