//! Handoff of the single in-flight request between the input thread and
//! the network loop.

use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};

/// An expression sent to the service and not yet answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
   pub id: u64,
   pub submitted: Instant,
   pub len: usize,
}

impl PendingRequest {
   pub fn elapsed(&self) -> Duration {
      self.submitted.elapsed()
   }
}

#[derive(Debug)]
enum State {
   Idle,
   Pending(PendingRequest),
   Closed,
}

#[derive(Debug)]
struct Inner {
   state: State,
   next_id: u64,
}

/// Slot holding at most one pending request.
///
/// The input thread blocks in [`PendingSlot::wait_idle`] until the network
/// loop completes the request or the session closes.
#[derive(Debug)]
pub struct PendingSlot {
   inner: Mutex<Inner>,
   changed: Condvar,
}

impl Default for PendingSlot {
   fn default() -> Self {
      Self::new()
   }
}

impl PendingSlot {
   pub const fn new() -> Self {
      Self {
         inner: Mutex::new(Inner {
            state: State::Idle,
            next_id: 1,
         }),
         changed: Condvar::new(),
      }
   }

   /// Marks a request of `len` bytes as in flight. Returns `None` when the
   /// slot is occupied or closed.
   pub fn begin(&self, len: usize) -> Option<PendingRequest> {
      let mut inner = self.inner.lock();
      if !matches!(inner.state, State::Idle) {
         return None;
      }
      let request = PendingRequest {
         id: inner.next_id,
         submitted: Instant::now(),
         len,
      };
      inner.next_id += 1;
      inner.state = State::Pending(request);
      Some(request)
   }

   /// Completes the pending request, waking the input thread.
   pub fn complete(&self) -> Option<PendingRequest> {
      let mut inner = self.inner.lock();
      let State::Pending(request) = inner.state else {
         debug!("Completion without a pending request");
         return None;
      };
      inner.state = State::Idle;
      drop(inner);
      self.changed.notify_all();
      debug!(
         "Request #{} ({} bytes) completed in {:?}",
         request.id,
         request.len,
         request.elapsed()
      );
      Some(request)
   }

   /// Withdraws request `id` if it is still pending, e.g. after a failed
   /// send.
   pub fn cancel(&self, id: u64) {
      let mut inner = self.inner.lock();
      if matches!(inner.state, State::Pending(request) if request.id == id) {
         inner.state = State::Idle;
         drop(inner);
         self.changed.notify_all();
      }
   }

   /// Blocks until no request is pending. Returns `false` if the slot was
   /// closed instead.
   pub fn wait_idle(&self) -> bool {
      let mut inner = self.inner.lock();
      loop {
         match inner.state {
            State::Idle => return true,
            State::Closed => return false,
            State::Pending(_) => self.changed.wait(&mut inner),
         }
      }
   }

   /// Closes the slot for good, releasing any waiter.
   pub fn close(&self) {
      self.inner.lock().state = State::Closed;
      self.changed.notify_all();
   }

   pub fn is_pending(&self) -> bool {
      matches!(self.inner.lock().state, State::Pending(_))
   }
}
