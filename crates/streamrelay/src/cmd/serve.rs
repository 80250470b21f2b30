use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use streamrelay_server::{FailurePolicy, RelayConfig, StreamRelay};
use tracing::{info, warn};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{relay_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_stats, OutputFormat};

const WATCH_INTERVAL: Duration = Duration::from_millis(50);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = build_config(&args)?;
    let relay = StreamRelay::new(config).map_err(|err| relay_error("invalid config", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), relay.clone())?;

    let serving = relay
        .spawn()
        .map_err(|err| relay_error("serve failed", err))?;
    info!(endpoint = ?relay.endpoint(), capacity = relay.config().capacity, "relay started");

    let stdin_done = Arc::new(AtomicBool::new(false));
    spawn_stdin_producer(relay.clone(), args.read_size, stdin_done.clone())?;

    while running.load(Ordering::SeqCst) && !serving.is_finished() {
        if args.exit_when_drained && stdin_done.load(Ordering::SeqCst) && relay.stats().is_drained()
        {
            info!("input drained; exiting");
            break;
        }
        thread::sleep(WATCH_INTERVAL);
    }

    let result = serving.stop();
    print_stats(relay.endpoint(), &relay.stats(), format);
    result.map_err(|err| relay_error("serve failed", err))?;

    Ok(SUCCESS)
}

fn build_config(args: &ServeArgs) -> CliResult<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            RelayConfig::from_json_file(path).map_err(|err| relay_error("config load failed", err))?
        }
        None => RelayConfig::default(),
    };

    config.endpoint = args.path.clone();
    if let Some(capacity) = args.capacity {
        config = config.with_capacity(capacity);
    }
    if let Some(max_write_size) = args.max_write_size {
        config = config.with_max_write_size(max_write_size);
    }
    if let Some(timeout) = &args.write_timeout {
        config = config.with_write_timeout(Some(parse_duration(timeout)?));
    }
    if args.fail_fast {
        config = config.with_failure_policy(FailurePolicy::FailFast);
    }
    if args.read_size == 0 {
        return Err(CliError::new(USAGE, "--read-size must be greater than zero"));
    }

    Ok(config)
}

// The producer is never joined: a read blocked on an idle stdin must not
// hold up shutdown.
fn spawn_stdin_producer(
    relay: StreamRelay,
    read_size: usize,
    done: Arc<AtomicBool>,
) -> CliResult<()> {
    thread::Builder::new()
        .name("streamrelay-stdin".to_string())
        .spawn(move || {
            let mut stdin = std::io::stdin().lock();
            let mut buf = vec![0u8; read_size];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => relay.offer(&buf[..n]),
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!(error = %err, "stdin read failed");
                        break;
                    }
                }
            }
            info!("stdin closed");
            done.store(true, Ordering::SeqCst);
        })
        .map(|_| ())
        .map_err(|err| CliError::new(INTERNAL, format!("stdin reader failed to start: {err}")))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>, relay: StreamRelay) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        relay.shutdown();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
