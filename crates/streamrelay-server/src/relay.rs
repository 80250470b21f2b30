use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use serde::Serialize;
use streamrelay_queue::{Admission, QueueMonitor, QueueStats};
use streamrelay_transport::{EndpointStream, TransportError, UnixEndpoint};
use tracing::{debug, error, info, trace, warn};

use crate::config::{FailurePolicy, RelayConfig};
use crate::error::{RelayError, Result};

/// Where the serve loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RelayState {
    /// Not serving yet.
    Idle = 0,
    /// Endpoint bound, waiting for a client.
    Listening = 1,
    /// A client is attached and the queue is being drained to it.
    Connected = 2,
    /// The serve loop has returned.
    Stopped = 3,
}

impl RelayState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RelayState::Listening,
            2 => RelayState::Connected,
            3 => RelayState::Stopped,
            _ => RelayState::Idle,
        }
    }
}

/// Relay-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub state: RelayState,
    pub connections: u64,
    pub delivered_chunks: u64,
    pub delivered_bytes: u64,
    /// Chunks popped for a client whose write then failed. Never redelivered.
    pub lost_in_flight_chunks: u64,
    pub lost_in_flight_bytes: u64,
    #[serde(flatten)]
    pub queue: QueueStats,
}

impl RelayStats {
    /// Bytes the relay discarded: evicted, rejected or lost mid-write.
    pub fn dropped_bytes(&self) -> u64 {
        self.queue.evicted_bytes + self.queue.rejected_bytes + self.lost_in_flight_bytes
    }

    /// Every accepted byte has been delivered or dropped; nothing is queued
    /// or mid-write.
    pub fn is_drained(&self) -> bool {
        self.queue.buffered_bytes == 0
            && self.delivered_bytes + self.queue.evicted_bytes + self.lost_in_flight_bytes
                == self.queue.accepted_bytes
    }
}

struct RelayShared {
    config: RelayConfig,
    monitor: QueueMonitor,
    shutdown: AtomicBool,
    serving: AtomicBool,
    state: AtomicU8,
    // Second handle on the attached client, so shutdown can abort a blocked write.
    active: Mutex<Option<EndpointStream>>,
    connections: AtomicU64,
    delivered_chunks: AtomicU64,
    delivered_bytes: AtomicU64,
    lost_chunks: AtomicU64,
    lost_bytes: AtomicU64,
}

/// A bounded byte relay serving one client at a time on a fixed endpoint.
///
/// Cloning is cheap and every clone refers to the same relay: hand one to
/// producers for [`offer`](Self::offer) and run [`serve`](Self::serve) (or
/// [`spawn`](Self::spawn)) on another.
#[derive(Clone)]
pub struct StreamRelay {
    shared: Arc<RelayShared>,
}

impl StreamRelay {
    /// Create a relay. Nothing is bound until the serve loop starts.
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let monitor = QueueMonitor::new(config.capacity);
        Ok(Self {
            shared: Arc::new(RelayShared {
                config,
                monitor,
                shutdown: AtomicBool::new(false),
                serving: AtomicBool::new(false),
                state: AtomicU8::new(RelayState::Idle as u8),
                active: Mutex::new(None),
                connections: AtomicU64::new(0),
                delivered_chunks: AtomicU64::new(0),
                delivered_bytes: AtomicU64::new(0),
                lost_chunks: AtomicU64::new(0),
                lost_bytes: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    pub fn endpoint(&self) -> &Path {
        &self.shared.config.endpoint
    }

    /// Queue `data` for the client. Never blocks on the consumer and never
    /// fails from the caller's point of view.
    ///
    /// When the queue is full the oldest data is dropped; a chunk larger
    /// than the whole capacity is dropped on its own.
    pub fn offer(&self, data: &[u8]) {
        let _ = self.admit(data);
    }

    /// Same as [`offer`](Self::offer) but reports what happened to the chunk.
    pub fn admit(&self, data: &[u8]) -> Admission {
        let admission = self.shared.monitor.offer(data);
        if admission == Admission::Closed {
            trace!(len = data.len(), "relay shut down; chunk discarded");
        }
        admission
    }

    pub fn state(&self) -> RelayState {
        RelayState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RelayStats {
        let shared = &self.shared;
        RelayStats {
            state: self.state(),
            connections: shared.connections.load(Ordering::Relaxed),
            delivered_chunks: shared.delivered_chunks.load(Ordering::Relaxed),
            delivered_bytes: shared.delivered_bytes.load(Ordering::Relaxed),
            lost_in_flight_chunks: shared.lost_chunks.load(Ordering::Relaxed),
            lost_in_flight_bytes: shared.lost_bytes.load(Ordering::Relaxed),
            queue: shared.monitor.stats(),
        }
    }

    /// Run the serve loop on a dedicated thread.
    pub fn spawn(&self) -> Result<RelayThread> {
        let relay = self.clone();
        let handle = std::thread::Builder::new()
            .name("streamrelay-serve".to_string())
            .spawn(move || relay.serve())
            .map_err(|err| RelayError::Thread(err.to_string()))?;
        Ok(RelayThread {
            relay: self.clone(),
            handle: Some(handle),
        })
    }

    /// Run the serve loop on the calling thread until [`shutdown`](Self::shutdown)
    /// or a failure the configured policy treats as fatal.
    pub fn serve(&self) -> Result<()> {
        if self.shared.serving.swap(true, Ordering::SeqCst) {
            return Err(RelayError::AlreadyServing);
        }

        let result = self.serve_loop();
        self.set_state(RelayState::Stopped);
        self.shared.serving.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => info!(endpoint = ?self.endpoint(), "relay stopped"),
            Err(err) => error!(endpoint = ?self.endpoint(), error = %err, "relay serve loop terminated"),
        }
        result
    }

    /// Stop serving: wake the consumer, abort any in-progress write and
    /// unblock a pending accept. Data still queued is discarded.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(endpoint = ?self.endpoint(), "relay shutting down");

        self.shared.monitor.close();
        if let Some(active) = self.lock_active().take() {
            let _ = active.shutdown();
        }
        if self.shared.serving.load(Ordering::SeqCst) {
            // A throwaway connection gets a blocked accept to return.
            let _ = UnixEndpoint::connect(self.endpoint());
        }
    }

    fn serve_loop(&self) -> Result<()> {
        let mut endpoint: Option<UnixEndpoint> = None;
        let mut failures = 0u32;

        while !self.is_shutdown() {
            if endpoint.is_none() {
                match UnixEndpoint::bind(self.endpoint()) {
                    Ok(bound) => {
                        debug!(lock = ?bound.lock_path(), "endpoint name claimed");
                        endpoint = Some(bound);
                    }
                    Err(err) => {
                        self.recover(&mut failures, err, RelayError::EndpointCreation)?;
                        continue;
                    }
                }
            }
            let Some(listener) = endpoint.as_ref() else {
                continue;
            };

            // Checked after bind so a concurrent shutdown either sees us
            // serving and connects, or we see its flag here.
            if self.is_shutdown() {
                break;
            }
            self.set_state(RelayState::Listening);

            match listener.accept() {
                Ok(stream) => {
                    if self.is_shutdown() {
                        break;
                    }
                    failures = 0;
                    self.drain(stream);
                }
                Err(err) => {
                    if self.is_shutdown() {
                        break;
                    }
                    endpoint = None;
                    self.recover(&mut failures, err, RelayError::Accept)?;
                }
            }
        }

        Ok(())
    }

    /// Decide whether the loop survives an endpoint failure, backing off if so.
    fn recover(
        &self,
        failures: &mut u32,
        err: TransportError,
        fatal: fn(TransportError) -> RelayError,
    ) -> Result<()> {
        *failures = failures.saturating_add(1);

        let retry = match self.shared.config.on_endpoint_failure {
            FailurePolicy::Retry(retry) if !err.is_configuration_error() => retry,
            _ => return Err(fatal(err)),
        };
        if !retry.allows(*failures) {
            return Err(RelayError::RetriesExhausted {
                attempts: *failures,
                source: err,
            });
        }

        let delay = retry.backoff(*failures);
        warn!(
            error = %err,
            attempt = *failures,
            delay_ms = delay.as_millis() as u64,
            "endpoint failure; retrying"
        );
        self.shared.monitor.sleep_unless_closed(delay);
        Ok(())
    }

    /// Feed queued chunks to one client until a write fails or shutdown.
    fn drain(&self, mut stream: EndpointStream) {
        let shared = &self.shared;
        let connection = shared.connections.fetch_add(1, Ordering::Relaxed) + 1;
        let peer = stream.peer_credentials();
        info!(
            connection,
            peer_pid = peer.map(|(_, _, pid)| pid),
            peer_uid = peer.map(|(uid, _, _)| uid),
            "client connected"
        );

        self.prepare_stream(&stream);
        match stream.try_clone() {
            Ok(handle) => *self.lock_active() = Some(handle),
            Err(err) => warn!(error = %err, "could not register client for shutdown"),
        }
        self.set_state(RelayState::Connected);

        let max_write = shared.config.max_write_size;
        while let Some(chunk) = shared.monitor.wait_pop() {
            match write_chunk(&mut stream, chunk.as_bytes(), max_write) {
                Ok(()) => {
                    shared.delivered_chunks.fetch_add(1, Ordering::Relaxed);
                    shared
                        .delivered_bytes
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    trace!(connection, len = chunk.len(), "chunk delivered");
                }
                Err(err) => {
                    shared.lost_chunks.fetch_add(1, Ordering::Relaxed);
                    shared
                        .lost_bytes
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    info!(
                        connection,
                        error = %err,
                        lost_bytes = chunk.len(),
                        "client disconnected"
                    );
                    break;
                }
            }
        }

        self.lock_active().take();
        drop(stream);
        debug!(connection, "client stream closed");
    }

    fn prepare_stream(&self, stream: &EndpointStream) {
        let config = &self.shared.config;
        if let Err(err) = stream.set_write_timeout(config.write_timeout()) {
            warn!(error = %err, "failed to apply write timeout");
        }
        if let Err(err) = stream.set_send_buffer_size(config.max_write_size) {
            debug!(error = %err, "failed to size send buffer");
        }
    }

    fn set_state(&self, state: RelayState) {
        self.shared.state.store(state as u8, Ordering::SeqCst);
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<EndpointStream>> {
        self.shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for StreamRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRelay")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

/// Write the whole payload in slices of at most `max_write` bytes, then flush.
fn write_chunk(stream: &mut impl Write, payload: &[u8], max_write: usize) -> std::io::Result<()> {
    for slice in payload.chunks(max_write.max(1)) {
        let mut offset = 0usize;
        while offset < slice.len() {
            match stream.write(&slice[offset..]) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    loop {
        match stream.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

/// A serve loop running on its own thread.
///
/// Dropping the handle shuts the relay down and waits for the thread.
pub struct RelayThread {
    relay: StreamRelay,
    handle: Option<JoinHandle<Result<()>>>,
}

impl RelayThread {
    pub fn relay(&self) -> &StreamRelay {
        &self.relay
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Shut the relay down and wait for the serve loop to return.
    pub fn stop(mut self) -> Result<()> {
        self.relay.shutdown();
        self.join_inner()
    }

    /// Wait for the serve loop to return without requesting shutdown.
    pub fn join(mut self) -> Result<()> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| RelayError::Thread("serve thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for RelayThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.relay.shutdown();
            let _ = self.join_inner();
        }
    }
}
