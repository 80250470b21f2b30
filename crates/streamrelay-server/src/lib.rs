//! Single-client reconnecting relay server.
//!
//! [`StreamRelay`] accepts bytes from any number of producer threads through
//! an infallible [`StreamRelay::offer`], buffers them in a bounded
//! drop-oldest queue and drains them, in order, to whichever client is
//! attached to the relay's endpoint. When the client goes away the relay
//! goes back to waiting for the next one; buffered data carries over.
//!
//! [`RelayClient`] is the matching consumer that dials, reads and redials.

pub mod client;
pub mod config;
pub mod error;
pub mod relay;

pub use client::RelayClient;
pub use config::{FailurePolicy, RelayConfig, RetryPolicy, DEFAULT_MAX_WRITE_SIZE};
pub use error::{RelayError, Result};
pub use relay::{RelayState, RelayStats, RelayThread, StreamRelay};
pub use streamrelay_queue::Admission;
