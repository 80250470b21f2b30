use std::io::{ErrorKind, Read, Write};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use streamrelay_server::RelayClient;
use tracing::debug;

use crate::cmd::{parse_duration, TailArgs};
use crate::exit::{
    io_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT, USAGE,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: TailArgs) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    if args.read_size == 0 {
        return Err(CliError::new(USAGE, "--read-size must be greater than zero"));
    }
    let client = RelayClient::new(&args.path).with_read_buffer_size(args.read_size);
    let mut sink = StdoutSink::new(args.max_bytes);
    if sink.is_full() {
        return Ok(SUCCESS);
    }

    if args.follow {
        let mut failure = None;
        client
            .subscribe(&running, |data| match sink.write(data) {
                Ok(flow) => flow,
                Err(err) => {
                    failure = Some(err);
                    ControlFlow::Break(())
                }
            })
            .map_err(|err| transport_error("receive failed", err))?;
        return match failure {
            Some(err) => Err(err),
            None => Ok(SUCCESS),
        };
    }

    let timeout = parse_duration(&args.connect_timeout)?;
    let mut stream = client
        .connect_with_timeout(timeout)
        .map_err(|err| CliError::new(TIMEOUT, format!("connect failed: {err}")))?;
    stream
        .set_read_timeout(Some(POLL_INTERVAL))
        .map_err(|err| transport_error("connect failed", err))?;

    let mut buf = vec![0u8; args.read_size];
    while running.load(Ordering::SeqCst) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if sink.write(&buf[..n])?.is_break() {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(err) if err.kind() == ErrorKind::ConnectionReset => break,
            Err(err) => return Err(io_error("receive failed", err)),
        }
    }

    debug!(written = sink.written, "tail finished");
    Ok(SUCCESS)
}

/// Copies relay bytes to stdout, stopping at an optional byte limit.
struct StdoutSink {
    out: std::io::Stdout,
    limit: Option<u64>,
    written: u64,
}

impl StdoutSink {
    fn new(limit: Option<u64>) -> Self {
        Self {
            out: std::io::stdout(),
            limit,
            written: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.written >= limit)
    }

    fn write(&mut self, data: &[u8]) -> CliResult<ControlFlow<()>> {
        let take = match self.limit {
            Some(limit) => data
                .len()
                .min(usize::try_from(limit - self.written).unwrap_or(usize::MAX)),
            None => data.len(),
        };

        let mut out = self.out.lock();
        out.write_all(&data[..take])
            .and_then(|()| out.flush())
            .map_err(|err| io_error("stdout write failed", err))?;
        self.written += take as u64;

        if self.is_full() {
            Ok(ControlFlow::Break(()))
        } else {
            Ok(ControlFlow::Continue(()))
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
