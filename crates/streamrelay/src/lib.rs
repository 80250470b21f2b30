//! Bounded, drop-oldest byte relay to a single reconnecting client.
//!
//! Producers hand bytes to a relay that never blocks them; the relay keeps
//! at most `capacity` bytes, discarding the oldest data first, and streams
//! everything it holds to whichever client is attached to its endpoint.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix socket endpoint with single-owner locking
//! - [`queue`]: Bounded drop-oldest queue and its blocking monitor
//! - [`server`]: The relay serve loop, its configuration and a reconnecting client

/// Re-export transport types.
pub mod transport {
    pub use streamrelay_transport::*;
}

/// Re-export queue types.
pub mod queue {
    pub use streamrelay_queue::*;
}

/// Re-export relay server types.
pub mod server {
    pub use streamrelay_server::*;
}
