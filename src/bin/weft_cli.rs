use std::{error::Error, io, net::SocketAddr, time::Duration};

use clap::Parser;
use weft::{
    Command, CommandError, SchedulerConfig, prompt,
    protocol::{Client, Request},
};

#[derive(Debug, Parser)]
#[command(version, about = "Interactive client for a weft server")]
struct Cli {
    /// Address of the server
    address: SocketAddr,
    /// Timeout in milliseconds for each socket call
    #[arg(long, env = "WEFT_IO_TIMEOUT_MS", default_value_t = 30_000)]
    io_timeout_ms: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = SchedulerConfig::new().io_timeout(Duration::from_millis(cli.io_timeout_ms));
    let mut client = Client::connect(cli.address, &config);

    let stdio = io::stdin();
    let stdout = io::stdout();

    loop {
        let reader = stdio.lock();
        let writer = Flushing(stdout.lock());

        let cmd = match prompt(reader, writer) {
            Ok(c) => c,
            Err(CommandError::Empty) => continue,
            Err(CommandError::Io(e)) => return Err(e.into()),
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        if let Command::Exit = cmd {
            client.close();
            break;
        }

        match Request::try_from(cmd) {
            Ok(request) => println!("{}", client.request(&request)),
            Err(e) => eprintln!("invalid request: {e}"),
        }
    }

    Ok(())
}

/// Writer that flushes after every write.
struct Flushing<W: io::Write>(W);

impl<W: io::Write> io::Write for Flushing<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.0.write(buf)?;
        self.0.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
