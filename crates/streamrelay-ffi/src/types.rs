use std::ffi::c_void;

use streamrelay_server::{RelayStats, RelayThread};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayResult {
    Ok = 0,
    InvalidArgument = 1,
    TransportError = 2,
    InvalidConfig = 3,
    ThreadError = 4,
    Internal = 99,
}

#[allow(dead_code)]
pub const RELAY_OK: RelayResult = RelayResult::Ok;
#[allow(dead_code)]
pub const RELAY_ERR_INVALID_ARGUMENT: RelayResult = RelayResult::InvalidArgument;
#[allow(dead_code)]
pub const RELAY_ERR_TRANSPORT: RelayResult = RelayResult::TransportError;
#[allow(dead_code)]
pub const RELAY_ERR_INVALID_CONFIG: RelayResult = RelayResult::InvalidConfig;
#[allow(dead_code)]
pub const RELAY_ERR_THREAD: RelayResult = RelayResult::ThreadError;
#[allow(dead_code)]
pub const RELAY_ERR_INTERNAL: RelayResult = RelayResult::Internal;

/// Relay counters as seen from C.
///
/// `state`: 0 idle, 1 listening, 2 connected, 3 stopped.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayStatsC {
    pub state: u8,
    pub capacity: usize,
    pub buffered_bytes: usize,
    pub buffered_chunks: usize,
    pub connections: u64,
    pub delivered_bytes: u64,
    pub evicted_bytes: u64,
    pub rejected_bytes: u64,
    pub lost_in_flight_bytes: u64,
}

impl From<&RelayStats> for RelayStatsC {
    fn from(stats: &RelayStats) -> Self {
        Self {
            state: stats.state as u8,
            capacity: stats.queue.capacity,
            buffered_bytes: stats.queue.buffered_bytes,
            buffered_chunks: stats.queue.buffered_chunks,
            connections: stats.connections,
            delivered_bytes: stats.delivered_bytes,
            evicted_bytes: stats.queue.evicted_bytes,
            rejected_bytes: stats.queue.rejected_bytes,
            lost_in_flight_bytes: stats.lost_in_flight_bytes,
        }
    }
}

pub type RelayHandle = *mut c_void;

pub(crate) struct RelayHandleInner {
    pub(crate) thread: RelayThread,
}
