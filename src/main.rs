use clap::Parser;
use std::io::Write;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use odrive_check::config::DISCOVERY_TIMEOUT;
use odrive_check::diagnostic::{self, Options, UsbSerialAccess};

/// Check that an ODrive is connected over USB and print its bus voltage
#[derive(Parser)]
#[command(name = "odrive-check", version)]
struct Cli {
    /// Serial port of the ODrive (searched by USB id if not given)
    #[arg(short, long)]
    port: Option<String>,

    /// Seconds to wait for an ODrive to appear
    #[arg(short, long, default_value_t = DISCOVERY_TIMEOUT.as_secs())]
    timeout: u64,

    /// Also report serial number, axis state and error registers
    #[arg(long)]
    status: bool,

    /// Send ASCII line checksums with every request
    #[arg(long)]
    checksum: bool,
}

fn main() {
    // Logs go to stderr so stdout stays parseable (set RUST_LOG=info or debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let access = UsbSerialAccess::new(cli.port, cli.checksum);
    let options = Options {
        timeout: Duration::from_secs(cli.timeout),
        status: cli.status,
    };

    let mut stdout = std::io::stdout().lock();
    let result = diagnostic::run(&access, &options, &mut stdout).and_then(|outcome| {
        stdout.flush()?;
        Ok(outcome)
    });

    match result {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            eprintln!("Failed to write output: {}", e);
            std::process::exit(1);
        }
    }
}
