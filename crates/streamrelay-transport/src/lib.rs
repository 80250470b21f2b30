//! Local duplex endpoint transport for streamrelay.
//!
//! A relay publishes exactly one well-known endpoint and serves one client at
//! a time over it. On Unix the endpoint is a filesystem-path domain socket
//! guarded by an exclusive lock file so that only one server process owns
//! the name.
//!
//! This is the lowest layer of streamrelay. The serve loop and the
//! reconnecting client both build on the [`EndpointStream`] type provided
//! here.

pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use stream::EndpointStream;

#[cfg(unix)]
pub use uds::UnixEndpoint;
