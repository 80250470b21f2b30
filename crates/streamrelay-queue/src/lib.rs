//! Bounded drop-oldest byte queue with blocking consumer wait.
//!
//! Producers hand over byte chunks that are copied on arrival and appended
//! to a FIFO whose total size never exceeds a fixed capacity:
//! - [`RelayQueue`] enforces the cap, evicting the oldest chunks on overflow
//! - [`QueueMonitor`] wraps a queue in a mutex and condition variable so one
//!   consumer thread can block until data arrives
//!
//! A single chunk larger than the capacity is always rejected.

pub mod chunk;
pub mod monitor;
pub mod queue;

pub use chunk::Chunk;
pub use monitor::{Admission, QueueMonitor};
pub use queue::{QueueStats, RelayQueue, DEFAULT_CAPACITY};
