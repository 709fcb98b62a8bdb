//! Session coordinator.
//!
//! Two OS threads share the session. The input thread reads lines, marks a
//! request pending and hands the encoded expression to the writer task; in
//! interactive mode it then waits for the request to complete before
//! reading on. The network loop (on the runtime thread) decodes the
//! service's output, completes requests and forwards interrupts.
//!
//! All writes to the socket go through the single writer task, so an
//! interrupt byte always lands between frames, never inside one.

use std::{
   io::{self, Write},
   sync::Arc,
   thread,
};

use bluer::Address;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
   io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf},
   sync::{mpsc, oneshot},
   task,
};

use crate::{
   bluetooth::rfcomm::Session,
   error::{ClientError, Result},
   repl::{
      input::LineSource,
      interrupt::Interrupts,
      parser::{ResponseDecoder, ResponseEvent},
      pending::PendingSlot,
      protocol::{self, Packet},
   },
};

const COMMAND_QUEUE_DEPTH: usize = 16;
const READ_BUFFER_SIZE: usize = 1024;

/// Session behavior.
#[derive(Debug, Clone)]
pub struct ReplOptions {
   /// Wait for each result before reading the next line. Otherwise a
   /// single request is sent and the session ends with its result.
   pub interactive: bool,
   /// Largest output block accepted from the service.
   pub receive_buffer: usize,
}

struct ConsoleInner {
   out: Box<dyn Write + Send>,
   line_open: bool,
}

/// Terminal output shared by both threads.
#[derive(Clone)]
pub struct Console {
   inner: Arc<Mutex<ConsoleInner>>,
   prompt: Arc<str>,
}

impl Console {
   pub fn new(out: impl Write + Send + 'static, prompt: &str) -> Self {
      Self {
         inner: Arc::new(Mutex::new(ConsoleInner {
            out: Box::new(out),
            line_open: false,
         })),
         prompt: prompt.into(),
      }
   }

   pub fn stdout(prompt: &str) -> Self {
      Self::new(io::stdout(), prompt)
   }

   /// Writes evaluation output as it arrives.
   pub fn output(&self, bytes: &[u8]) {
      if bytes.is_empty() {
         return;
      }
      let mut inner = self.inner.lock();
      inner.line_open = !bytes.ends_with(b"\n");
      let res = inner.out.write_all(bytes).and_then(|()| inner.out.flush());
      if let Err(e) = res {
         debug!("Console write failed: {e}");
      }
   }

   /// Terminates output that did not end in a newline.
   pub fn finish_line(&self) {
      let mut inner = self.inner.lock();
      if inner.line_open {
         inner.line_open = false;
         let _ = inner.out.write_all(b"\n");
      }
   }

   pub fn newline(&self) {
      let mut inner = self.inner.lock();
      inner.line_open = false;
      let _ = inner.out.write_all(b"\n").and_then(|()| inner.out.flush());
   }

   pub fn prompt(&self) {
      let mut inner = self.inner.lock();
      // The echoed newline of the next input line closes the prompt line.
      inner.line_open = false;
      let res = inner
         .out
         .write_all(self.prompt.as_bytes())
         .and_then(|()| inner.out.flush());
      if let Err(e) = res {
         debug!("Console write failed: {e}");
      }
   }
}

enum Command {
   Send {
      data: Packet,
      then: Option<oneshot::Sender<io::Result<()>>>,
   },
   Shutdown,
}

/// Queue into the writer task. Cheaply cloneable.
#[derive(Clone)]
struct WireSender {
   tx: mpsc::Sender<Command>,
}

fn closed() -> io::Error {
   io::Error::new(io::ErrorKind::BrokenPipe, "writer closed")
}

impl WireSender {
   /// Sends from a plain thread and waits until the bytes are written.
   fn send_blocking(&self, data: Packet) -> io::Result<()> {
      let (tx, rx) = oneshot::channel();
      self
         .tx
         .blocking_send(Command::Send {
            data,
            then: Some(tx),
         })
         .map_err(|_| closed())?;
      rx.blocking_recv().map_err(|_| closed())?
   }

   /// Queues bytes without waiting for the write.
   async fn post(&self, data: Packet) -> io::Result<()> {
      self
         .tx
         .send(Command::Send { data, then: None })
         .await
         .map_err(|_| closed())
   }

   async fn shutdown(&self) {
      let _ = self.tx.send(Command::Shutdown).await;
   }
}

async fn send_thread<W: AsyncWrite>(adr: Address, mut rx: mpsc::Receiver<Command>, mut wr: WriteHalf<W>) {
   while let Some(cmd) = rx.recv().await {
      match cmd {
         Command::Send { data, then } => {
            debug!("→ {adr}: {}", hex::encode(&data));
            let res = match wr.write_all(&data).await {
               Ok(()) => wr.flush().await,
               Err(e) => Err(e),
            };
            if let Err(e) = &res {
               warn!("Failed to send data: {e}");
            }
            if let Some(then) = then {
               _ = then.send(res);
            }
         },
         Command::Shutdown => break,
      }
   }
   if let Err(e) = wr.shutdown().await {
      debug!("Write shutdown failed: {e}");
   }
}

/// Body of the input thread.
fn input_loop<L: LineSource>(
   mut lines: L,
   sender: WireSender,
   pending: Arc<PendingSlot>,
   console: Console,
   interactive: bool,
) {
   loop {
      let line = match lines.next_line() {
         Ok(Some(line)) => line,
         Ok(None) => break,
         Err(e) => {
            warn!("Failed to read input: {e}");
            break;
         },
      };
      if line.is_empty() {
         if interactive {
            console.prompt();
         }
         continue;
      }

      let Some(request) = pending.begin(line.len()) else {
         break;
      };
      if let Err(e) = sender.send_blocking(protocol::encode_expression(&line)) {
         debug!("Dropping request #{}: {e}", request.id);
         pending.cancel(request.id);
         break;
      }
      if !interactive || !pending.wait_idle() {
         break;
      }
   }
   debug!("Input thread done");
}

/// Runs the session until input ends, the service hangs up or the wire
/// goes out of sync.
///
/// End of stream and socket errors end the session normally; only a
/// protocol violation is an error.
pub async fn run<S, L>(
   session: Session<S>,
   lines: L,
   mut interrupts: Interrupts,
   console: Console,
   options: ReplOptions,
) -> Result<()>
where
   S: AsyncRead + AsyncWrite + Send + 'static,
   L: LineSource,
{
   let address = session.address();
   let (mut rd, wr) = tokio::io::split(session.into_stream());

   let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
   let sender = WireSender { tx: cmd_tx };
   let writer = tokio::spawn(send_thread(address, cmd_rx, wr));

   let pending = Arc::new(PendingSlot::new());
   let cancel = lines.canceller();
   let (done_tx, mut done_rx) = oneshot::channel::<()>();
   if options.interactive {
      console.prompt();
   }
   let input = {
      let sender = sender.clone();
      let pending = pending.clone();
      let console = console.clone();
      let interactive = options.interactive;
      thread::Builder::new()
         .name("schmeep-input".into())
         .spawn(move || {
            input_loop(lines, sender, pending, console, interactive);
            drop(done_tx);
         })?
   };

   let mut decoder = ResponseDecoder::new(options.receive_buffer);
   let mut buf = [0u8; READ_BUFFER_SIZE];
   let mut input_done = false;

   let result = loop {
      tokio::select! {
         Some(()) = interrupts.recv() => {
            debug!("Interrupt requested");
            if let Err(e) = sender.post(protocol::interrupt_packet()).await {
               debug!("Interrupt not sent: {e}");
            }
            console.newline();
            if options.interactive && !pending.is_pending() {
               console.prompt();
            }
         },
         _ = &mut done_rx, if !input_done => {
            input_done = true;
            if !pending.is_pending() {
               break Ok(());
            }
         },
         read = rd.read(&mut buf) => {
            let n = match read {
               Ok(0) => {
                  info!("Connection closed by {address}");
                  break Ok(());
               },
               Ok(n) => n,
               Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
               Err(e) => {
                  warn!("Connection to {address} lost: {e}");
                  break Ok(());
               },
            };
            let received = &buf[..n];
            debug!("← {address}: {}", hex::encode(received));

            let mut completed = false;
            let decoded = decoder.feed(received, |event| match event {
               ResponseEvent::Output(bytes) => console.output(bytes),
               ResponseEvent::Complete => {
                  console.finish_line();
                  pending.complete();
                  completed = true;
               },
            });
            if let Err(e) = decoded {
               break Err(ClientError::Protocol(e));
            }
            if completed {
               if !options.interactive || input_done {
                  break Ok(());
               }
               console.prompt();
            }
         },
      }
   };

   pending.close();
   if let Some(cancel) = cancel {
      cancel.cancel();
   }
   sender.shutdown().await;
   drop(sender);
   if task::spawn_blocking(move || input.join()).await?.is_err() {
      return Err(ClientError::InputPanicked);
   }
   writer.await?;
   info!("Connection closed");
   result
}
