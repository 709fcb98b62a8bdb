//! schmeep client
//!
//! Connects to the schmeep Scheme evaluation service on a paired Bluetooth
//! device and runs a REPL against it. With no argument the device is
//! discovered; a single argument names the device address.

use std::{
   env,
   io::{self, IsTerminal},
   process::ExitCode,
};

use log::info;
use schmeep::{
   ClientError, Result,
   bluetooth::{
      locator::{BluezDirectory, ServiceLocator},
      parse_address,
      rfcomm::{self, RfcommConnector},
   },
   cache::AddressCache,
   config::Config,
   repl::{self, ReplOptions, coordinator::Console, input::FdLines, interrupt::Interrupts},
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   let args: Vec<String> = env::args().collect();
   let program = args.first().map_or("schmeep", String::as_str);
   let target = match args.as_slice() {
      [_] => None,
      [_, address] => Some(address.as_str()),
      _ => {
         print_usage(program);
         eprintln!("If no address provided, will auto-discover");
         return ExitCode::FAILURE;
      },
   };

   match run(target).await {
      Ok(()) => ExitCode::SUCCESS,
      Err(e) => {
         eprintln!("{e}");
         if e.wants_usage_hint() {
            print_usage(program);
         }
         ExitCode::FAILURE
      },
   }
}

fn print_usage(program: &str) {
   eprintln!("Usage: {program} [bluetooth_address]");
   eprintln!("Example: {program} AA:BB:CC:DD:EE:FF");
}

async fn run(target: Option<&str>) -> Result<()> {
   let config = Config::load()?;
   let locator = ServiceLocator::new(BluezDirectory::new().await, AddressCache::for_user(), &config);

   let (address, channel) = match target {
      Some(arg) => {
         let address = parse_address(arg).ok_or_else(|| ClientError::InvalidAddress(arg.to_string()))?;
         (address, locator.resolve_address(address).await?)
      },
      None => locator.resolve().await?,
   };

   info!("Connecting to {address} on channel {channel}...");
   let session = rfcomm::connect(&RfcommConnector, address, channel, config.retry_policy()).await?;

   let interactive = io::stdin().is_terminal();
   if interactive {
      info!("Connected. Ctrl-C interrupts a running evaluation, Ctrl-D quits.");
   }

   repl::run(
      session,
      FdLines::stdin()?,
      Interrupts::from_sigint()?,
      Console::stdout(&config.prompt),
      ReplOptions {
         interactive,
         receive_buffer: config.receive_buffer(),
      },
   )
   .await
}
