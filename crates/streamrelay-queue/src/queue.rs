use std::collections::VecDeque;

use serde::Serialize;
use tracing::trace;

use crate::chunk::Chunk;

/// Default total byte capacity (10 MiB).
pub const DEFAULT_CAPACITY: usize = 0xA0_0000;

/// Counters describing what a queue has admitted, evicted and rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub buffered_chunks: usize,
    pub buffered_bytes: usize,
    pub accepted_chunks: u64,
    pub accepted_bytes: u64,
    pub evicted_chunks: u64,
    pub evicted_bytes: u64,
    pub rejected_chunks: u64,
    pub rejected_bytes: u64,
}

/// FIFO of [`Chunk`]s whose combined length never exceeds `capacity`.
///
/// Entries are only ever appended at the back and removed from the front.
/// The running size is cached so admission checks are O(1).
#[derive(Debug)]
pub struct RelayQueue {
    entries: VecDeque<Chunk>,
    capacity: usize,
    total: usize,
    stats: QueueStats,
}

impl RelayQueue {
    /// Create an empty queue holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            total: 0,
            stats: QueueStats {
                capacity,
                ..QueueStats::default()
            },
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of the lengths of all queued chunks.
    pub fn total_size(&self) -> usize {
        self.total
    }

    /// Number of queued chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a chunk of `len` bytes could ever be admitted.
    pub fn fits(&self, len: usize) -> bool {
        len <= self.capacity
    }

    /// Append `data` only if it fits in the remaining space.
    pub fn try_offer(&mut self, data: &[u8]) -> bool {
        if !self.fits(data.len()) || self.total + data.len() > self.capacity {
            self.record_rejected(data.len());
            return false;
        }
        self.try_push(Chunk::copy_from_slice(data)).is_ok()
    }

    /// Append `data`, evicting the oldest chunks as needed to make room.
    ///
    /// Returns `false` without touching the queue when `data` alone is
    /// larger than the capacity.
    pub fn force_offer(&mut self, data: &[u8]) -> bool {
        if !self.fits(data.len()) {
            self.record_rejected(data.len());
            return false;
        }
        self.force_push(Chunk::copy_from_slice(data)).is_ok()
    }

    /// Append an already-built chunk if it fits without eviction.
    ///
    /// The chunk is handed back on rejection.
    pub fn try_push(&mut self, chunk: Chunk) -> Result<(), Chunk> {
        if !self.fits(chunk.len()) || self.total + chunk.len() > self.capacity {
            self.record_rejected(chunk.len());
            return Err(chunk);
        }
        self.append(chunk);
        Ok(())
    }

    /// Append an already-built chunk, evicting from the front as needed.
    ///
    /// On success returns the number of chunks evicted to make room.
    pub fn force_push(&mut self, chunk: Chunk) -> Result<usize, Chunk> {
        if !self.fits(chunk.len()) {
            self.record_rejected(chunk.len());
            return Err(chunk);
        }

        let mut evicted = 0usize;
        while self.total + chunk.len() > self.capacity {
            // The loop only runs while total > 0, so the queue is non-empty.
            let Some(oldest) = self.entries.pop_front() else {
                break;
            };
            self.total -= oldest.len();
            self.stats.evicted_chunks += 1;
            self.stats.evicted_bytes += oldest.len() as u64;
            evicted += 1;
            trace!(len = oldest.len(), "evicted oldest chunk");
        }

        self.append(chunk);
        Ok(evicted)
    }

    /// Remove and return the oldest chunk. Never blocks.
    pub fn pop_oldest(&mut self) -> Option<Chunk> {
        let chunk = self.entries.pop_front()?;
        self.total -= chunk.len();
        Some(chunk)
    }

    /// Snapshot of the queue counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            buffered_chunks: self.entries.len(),
            buffered_bytes: self.total,
            ..self.stats
        }
    }

    fn append(&mut self, chunk: Chunk) {
        self.total += chunk.len();
        self.stats.accepted_chunks += 1;
        self.stats.accepted_bytes += chunk.len() as u64;
        self.entries.push_back(chunk);
    }

    fn record_rejected(&mut self, len: usize) {
        self.stats.rejected_chunks += 1;
        self.stats.rejected_bytes += len as u64;
    }
}
