use std::io::{ErrorKind, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use streamrelay_transport::{EndpointStream, Result, TransportError, UnixEndpoint};
use tracing::{debug, info, trace};

/// Pause between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

// How often a blocked read checks the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Reconnecting consumer for a relay endpoint.
///
/// The relay only keeps one client at a time and may restart its endpoint,
/// so the client treats every disconnect as temporary and dials again.
#[derive(Debug, Clone)]
pub struct RelayClient {
    path: PathBuf,
    retry_interval: Duration,
    read_buffer_size: usize,
}

impl RelayClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Single connection attempt.
    pub fn connect(&self) -> Result<EndpointStream> {
        UnixEndpoint::connect(&self.path)
    }

    /// Keep dialing until connected or `timeout` has passed.
    pub fn connect_with_timeout(&self, timeout: Duration) -> Result<EndpointStream> {
        let start = Instant::now();
        loop {
            match self.connect() {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    if start.elapsed() >= timeout {
                        return Err(err);
                    }
                    trace!(path = ?self.path, error = %err, "relay not available yet");
                    std::thread::sleep(self.retry_interval.min(timeout));
                }
            }
        }
    }

    /// Stream relay bytes into `on_data` across reconnects.
    ///
    /// Returns when `on_data` breaks or `running` is cleared.
    pub fn subscribe<F>(&self, running: &AtomicBool, mut on_data: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        let mut buf = vec![0u8; self.read_buffer_size];

        while running.load(Ordering::SeqCst) {
            let mut stream = match self.connect() {
                Ok(stream) => stream,
                Err(err) => {
                    trace!(path = ?self.path, error = %err, "relay not available");
                    std::thread::sleep(self.retry_interval);
                    continue;
                }
            };
            stream.set_read_timeout(Some(POLL_INTERVAL))?;
            info!(path = ?self.path, "connected to relay");

            if pump(&mut stream, &mut buf, running, &mut on_data)?.is_break() {
                return Ok(());
            }

            info!(path = ?self.path, "relay connection lost; reconnecting");
            std::thread::sleep(self.retry_interval);
        }

        Ok(())
    }
}

/// Read until EOF (`Continue`), a callback break or a cleared flag (`Break`).
fn pump<F>(
    stream: &mut EndpointStream,
    buf: &mut [u8],
    running: &AtomicBool,
    on_data: &mut F,
) -> Result<ControlFlow<()>>
where
    F: FnMut(&[u8]) -> ControlFlow<()>,
{
    loop {
        if !running.load(Ordering::SeqCst) {
            return Ok(ControlFlow::Break(()));
        }
        match stream.read(buf) {
            Ok(0) => return Ok(ControlFlow::Continue(())),
            Ok(n) => {
                if on_data(&buf[..n]).is_break() {
                    return Ok(ControlFlow::Break(()));
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(err) if err.kind() == ErrorKind::ConnectionReset => {
                debug!(error = %err, "relay reset connection");
                return Ok(ControlFlow::Continue(()));
            }
            Err(err) => return Err(TransportError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/src-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("relay.sock")
    }

    #[test]
    fn connect_with_timeout_gives_up() {
        let client = RelayClient::new("/tmp/streamrelay-missing.sock")
            .with_retry_interval(Duration::from_millis(10));
        let start = Instant::now();
        let err = client
            .connect_with_timeout(Duration::from_millis(50))
            .expect_err("connect should time out");
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn subscribe_reconnects_after_disconnect() {
        let sock_path = make_sock_path("resub");
        let endpoint = UnixEndpoint::bind(&sock_path).expect("endpoint should bind");

        let server = thread::spawn(move || {
            let mut first = endpoint.accept().expect("first accept should succeed");
            first.write_all(b"one").expect("first write should succeed");
            drop(first);

            let mut second = endpoint.accept().expect("second accept should succeed");
            second.write_all(b"two").expect("second write should succeed");
            // Keep the endpoint alive until the client stops.
            let mut sink = [0u8; 1];
            let _ = second.read(&mut sink);
        });

        let client = RelayClient::new(&sock_path).with_retry_interval(Duration::from_millis(20));
        let running = Arc::new(AtomicBool::new(true));
        let mut received = Vec::new();
        client
            .subscribe(&running, |data| {
                received.extend_from_slice(data);
                if received.len() >= 6 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .expect("subscribe should succeed");

        assert_eq!(received, b"onetwo");
        server.join().expect("server thread should finish");

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn read_buffer_size_bounds_each_callback() {
        let sock_path = make_sock_path("bufsize");
        let endpoint = UnixEndpoint::bind(&sock_path).expect("endpoint should bind");

        let server = thread::spawn(move || {
            let mut stream = endpoint.accept().expect("accept should succeed");
            stream.write_all(b"abcdefghij").expect("write should succeed");
            let mut sink = [0u8; 1];
            let _ = stream.read(&mut sink);
        });

        let client = RelayClient::new(&sock_path)
            .with_retry_interval(Duration::from_millis(20))
            .with_read_buffer_size(3);
        let running = AtomicBool::new(true);
        let mut received = Vec::new();
        let mut largest = 0usize;
        client
            .subscribe(&running, |data| {
                largest = largest.max(data.len());
                received.extend_from_slice(data);
                if received.len() >= 10 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .expect("subscribe should succeed");

        assert_eq!(received, b"abcdefghij");
        assert!(largest <= 3, "callback saw {largest} bytes");
        server.join().expect("server thread should finish");

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn subscribe_stops_when_flag_clears() {
        let client = RelayClient::new("/tmp/streamrelay-never.sock")
            .with_retry_interval(Duration::from_millis(10));
        let running = Arc::new(AtomicBool::new(true));

        let stopper = {
            let running = Arc::clone(&running);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                running.store(false, Ordering::SeqCst);
            })
        };

        client
            .subscribe(&running, |_| ControlFlow::Continue(()))
            .expect("subscribe should return cleanly");
        stopper.join().expect("stopper should finish");
    }
}
