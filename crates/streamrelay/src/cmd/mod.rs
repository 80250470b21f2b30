use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod serve;
pub mod tail;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Relay stdin to one reconnecting client, dropping the oldest data when full.
    Serve(ServeArgs),
    /// Connect to a relay and copy its stream to stdout.
    Tail(TailArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Tail(args) => tail::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to serve on.
    pub path: PathBuf,
    /// JSON relay configuration; flags override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Maximum bytes buffered while no client is reading.
    #[arg(long)]
    pub capacity: Option<usize>,
    /// Largest single write to the client.
    #[arg(long)]
    pub max_write_size: Option<usize>,
    /// Drop a client that stops reading for this long (e.g. 5s, 500ms).
    #[arg(long)]
    pub write_timeout: Option<String>,
    /// Stop on the first endpoint failure instead of retrying.
    #[arg(long)]
    pub fail_fast: bool,
    /// Bytes read from stdin per offered chunk.
    #[arg(long, default_value_t = 64 * 1024)]
    pub read_size: usize,
    /// Exit once stdin has ended and everything buffered has been delivered.
    #[arg(long)]
    pub exit_when_drained: bool,
}

#[derive(Args, Debug)]
pub struct TailArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Exit after writing this many bytes.
    #[arg(long)]
    pub max_bytes: Option<u64>,
    /// Give up if the relay cannot be reached within this time (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", conflicts_with = "follow")]
    pub connect_timeout: String,
    /// Keep reconnecting whenever the relay drops the connection.
    #[arg(long)]
    pub follow: bool,
    /// Bytes requested from the relay per read.
    #[arg(long, default_value_t = 64 * 1024)]
    pub read_size: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
