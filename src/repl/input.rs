//! Line input for the input thread.
//!
//! Reading stdin blocks, so the reader waits in `poll(2)` on both the
//! input descriptor and a wake pipe. Writing to the pipe through
//! [`InputCancel`] makes the pending read return end-of-input, which lets
//! shutdown join the thread instead of leaving it stuck in `read`.

use std::{
   fs::File,
   io::{self, PipeReader, PipeWriter, Read, Write},
   os::fd::{AsFd, OwnedFd},
   sync::Arc,
};

use log::debug;
use nix::{
   errno::Errno,
   poll::{PollFd, PollFlags, PollTimeout, poll},
};

const READ_CHUNK: usize = 1024;

/// A blocking source of input lines.
pub trait LineSource: Send + 'static {
   /// Next line with its trailing newline removed, or `None` at end of
   /// input.
   fn next_line(&mut self) -> io::Result<Option<Vec<u8>>>;

   /// Handle that makes a blocked `next_line` return `None`.
   fn canceller(&self) -> Option<InputCancel> {
      None
   }
}

/// Wakes a blocked [`FdLines`] reader. Cheaply cloneable.
#[derive(Debug, Clone)]
pub struct InputCancel {
   wake: Arc<PipeWriter>,
}

impl InputCancel {
   pub fn cancel(&self) {
      if let Err(e) = (&*self.wake).write_all(&[1]) {
         debug!("Failed to wake input reader: {e}");
      }
   }
}

/// Cancellable line reader over a file descriptor.
#[derive(Debug)]
pub struct FdLines {
   file: File,
   wake: PipeReader,
   cancel: InputCancel,
   buf: Vec<u8>,
   eof: bool,
   cancelled: bool,
}

impl FdLines {
   pub fn new(fd: OwnedFd) -> io::Result<Self> {
      let (wake, writer) = io::pipe()?;
      Ok(Self {
         file: File::from(fd),
         wake,
         cancel: InputCancel {
            wake: Arc::new(writer),
         },
         buf: Vec::new(),
         eof: false,
         cancelled: false,
      })
   }

   /// Reader over a duplicate of the process's stdin.
   pub fn stdin() -> io::Result<Self> {
      Self::new(io::stdin().as_fd().try_clone_to_owned()?)
   }

   fn take_line(&mut self) -> Option<Vec<u8>> {
      let pos = self.buf.iter().position(|&b| b == b'\n')?;
      let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
      line.pop();
      Some(line)
   }

   /// Waits until input is readable. Returns `false` once cancelled.
   fn wait_readable(&mut self) -> io::Result<bool> {
      loop {
         let (readable, woken) = {
            let mut fds = [
               PollFd::new(self.file.as_fd(), PollFlags::POLLIN),
               PollFd::new(self.wake.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
               Ok(_) => {},
               Err(Errno::EINTR) => continue,
               Err(e) => return Err(e.into()),
            }
            let ready = |fd: &PollFd<'_>| fd.revents().is_some_and(|r| !r.is_empty());
            (ready(&fds[0]), ready(&fds[1]))
         };
         if woken {
            self.cancelled = true;
            return Ok(false);
         }
         if readable {
            return Ok(true);
         }
      }
   }
}

impl LineSource for FdLines {
   fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
      loop {
         if self.cancelled {
            return Ok(None);
         }
         if let Some(line) = self.take_line() {
            return Ok(Some(line));
         }
         if self.eof {
            if self.buf.is_empty() {
               return Ok(None);
            }
            return Ok(Some(std::mem::take(&mut self.buf)));
         }
         if !self.wait_readable()? {
            debug!("Input reader cancelled");
            return Ok(None);
         }

         let mut chunk = [0u8; READ_CHUNK];
         match self.file.read(&mut chunk) {
            Ok(0) => self.eof = true,
            Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
         }
      }
   }

   fn canceller(&self) -> Option<InputCancel> {
      Some(self.cancel.clone())
   }
}
