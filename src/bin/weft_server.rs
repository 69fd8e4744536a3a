use std::{error::Error, net::SocketAddr, time::Duration};

use clap::Parser;
use log::info;
use weft::{SchedulerConfig, protocol::Server, scheduler::DEFAULT_MAX_TASKS};

#[derive(Debug, Parser)]
#[command(version, about = "Serve weft clients from a single scheduler thread")]
struct Cli {
    /// Listen for new connections at address
    address: SocketAddr,
    /// Maximum number of concurrent sessions
    #[arg(long, env = "WEFT_MAX_TASKS", default_value_t = DEFAULT_MAX_TASKS)]
    max_tasks: usize,
    /// Run time in milliseconds after which a session yields to others
    #[arg(long, env = "WEFT_TIME_SLICE_MS", default_value_t = 20)]
    time_slice_ms: u64,
    /// Timeout in milliseconds for blocking socket calls
    #[arg(long, env = "WEFT_IO_TIMEOUT_MS", default_value_t = 30_000)]
    io_timeout_ms: u64,
    /// Maximum number of stored values, unlimited if omitted
    #[arg(long, env = "WEFT_MAX_VALUES")]
    max_values: Option<usize>,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let config = SchedulerConfig::new()
        .max_tasks(cli.max_tasks)
        .time_slice(Duration::from_millis(cli.time_slice_ms))
        .io_timeout(Duration::from_millis(cli.io_timeout_ms));

    let mut server = Server::bind(cli.address, config)?;
    if let Some(max_values) = cli.max_values {
        server = server.max_values(max_values);
    }
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("interrupted, shutting down");
        shutdown.shutdown();
    })?;

    server.run()?;
    Ok(())
}
