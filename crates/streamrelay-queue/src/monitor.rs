use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::queue::{QueueStats, RelayQueue};

/// Outcome of handing a chunk to a [`QueueMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Stored. `evicted` older chunks were dropped to make room.
    Accepted { evicted: usize },
    /// The chunk does not fit (larger than capacity, or no room without eviction).
    Rejected { len: usize, capacity: usize },
    /// The monitor has been closed; nothing is stored any more.
    Closed,
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }
}

struct MonitorState {
    queue: RelayQueue,
    closed: bool,
}

/// A [`RelayQueue`] behind one mutex, plus a condition variable signalled
/// whenever the queue gains data or the monitor is closed.
///
/// Producers call [`offer`](Self::offer) from any thread and never wait on
/// the consumer. The consumer blocks in [`wait_pop`](Self::wait_pop).
pub struct QueueMonitor {
    state: Mutex<MonitorState>,
    signal: Condvar,
}

impl QueueMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                queue: RelayQueue::new(capacity),
                closed: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// Store `data`, evicting the oldest chunks if needed, and wake waiters.
    pub fn offer(&self, data: &[u8]) -> Admission {
        self.admit(data, true)
    }

    /// Store `data` only if it fits without eviction, and wake waiters.
    pub fn try_offer(&self, data: &[u8]) -> Admission {
        self.admit(data, false)
    }

    fn admit(&self, data: &[u8], evict: bool) -> Admission {
        // Copy before taking the lock; the capacity never changes.
        let chunk = Chunk::copy_from_slice(data);
        let len = chunk.len();

        let mut state = self.lock();
        if state.closed {
            return Admission::Closed;
        }
        let capacity = state.queue.capacity();
        let admission = if evict {
            match state.queue.force_push(chunk) {
                Ok(evicted) => Admission::Accepted { evicted },
                Err(_) => Admission::Rejected { len, capacity },
            }
        } else {
            match state.queue.try_push(chunk) {
                Ok(()) => Admission::Accepted { evicted: 0 },
                Err(_) => Admission::Rejected { len, capacity },
            }
        };
        drop(state);

        match admission {
            Admission::Accepted { evicted } => {
                if evicted > 0 {
                    debug!(len, evicted, "queue full; dropped oldest chunks");
                }
                self.signal.notify_all();
            }
            Admission::Rejected { len, capacity } => {
                warn!(len, capacity, "chunk rejected");
            }
            Admission::Closed => {}
        }
        admission
    }

    /// Block until a chunk is available and return it.
    ///
    /// Returns `None` once the monitor is closed, even if data remains queued.
    pub fn wait_pop(&self) -> Option<Chunk> {
        let state = self.lock();
        let mut state = self
            .signal
            .wait_while(state, |s| !s.closed && s.queue.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return None;
        }
        state.queue.pop_oldest()
    }

    /// Like [`wait_pop`](Self::wait_pop) but gives up after `timeout`.
    pub fn wait_pop_timeout(&self, timeout: Duration) -> Option<Chunk> {
        let state = self.lock();
        let (mut state, _) = self
            .signal
            .wait_timeout_while(state, timeout, |s| !s.closed && s.queue.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return None;
        }
        state.queue.pop_oldest()
    }

    /// Remove the oldest chunk without waiting.
    pub fn pop_oldest(&self) -> Option<Chunk> {
        self.lock().queue.pop_oldest()
    }

    pub fn total_size(&self) -> usize {
        self.lock().queue.total_size()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().queue.capacity()
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().queue.stats()
    }

    /// Stop admitting data and release every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.signal.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Sleep for up to `duration`, returning early if the monitor is closed.
    ///
    /// Returns `true` when the full duration elapsed while still open.
    pub fn sleep_unless_closed(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = self.lock();
        loop {
            if state.closed {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            state = self
                .signal
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    // Queue operations never panic halfway through a mutation, so a poisoned
    // lock still guards a consistent queue.
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for QueueMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("QueueMonitor")
            .field("capacity", &state.queue.capacity())
            .field("total_size", &state.queue.total_size())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn offer_reports_eviction() {
        let monitor = QueueMonitor::new(10);
        assert_eq!(monitor.offer(b"AAAAAA"), Admission::Accepted { evicted: 0 });
        assert_eq!(monitor.offer(b"BBBBBB"), Admission::Accepted { evicted: 1 });
        assert_eq!(monitor.total_size(), 6);
    }

    #[test]
    fn offer_rejects_oversized_chunk() {
        let monitor = QueueMonitor::new(5);
        assert_eq!(
            monitor.offer(b"12345678"),
            Admission::Rejected {
                len: 8,
                capacity: 5
            }
        );
        assert_eq!(monitor.total_size(), 0);
        assert!(monitor.pop_oldest().is_none());
    }

    #[test]
    fn try_offer_does_not_evict() {
        let monitor = QueueMonitor::new(4);
        assert!(monitor.try_offer(b"abc").is_accepted());
        assert_eq!(
            monitor.try_offer(b"de"),
            Admission::Rejected {
                len: 2,
                capacity: 4
            }
        );
        assert_eq!(monitor.total_size(), 3);
    }

    #[test]
    fn wait_pop_wakes_on_offer() {
        let monitor = Arc::new(QueueMonitor::new(64));
        let consumer = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || monitor.wait_pop())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(monitor.offer(b"wake").is_accepted());

        let chunk = consumer
            .join()
            .expect("consumer should finish")
            .expect("consumer should receive a chunk");
        assert_eq!(chunk.as_bytes(), b"wake");
    }

    #[test]
    fn close_releases_waiter_and_blocks_offers() {
        let monitor = Arc::new(QueueMonitor::new(64));
        let consumer = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || monitor.wait_pop())
        };

        thread::sleep(Duration::from_millis(50));
        monitor.close();

        assert!(consumer.join().expect("consumer should finish").is_none());
        assert_eq!(monitor.offer(b"late"), Admission::Closed);
        assert!(monitor.is_closed());
    }

    #[test]
    fn wait_pop_timeout_expires_on_empty_queue() {
        let monitor = QueueMonitor::new(8);
        let started = Instant::now();
        assert!(monitor.wait_pop_timeout(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn sleep_unless_closed_returns_early() {
        let monitor = Arc::new(QueueMonitor::new(8));
        let sleeper = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || {
                let started = Instant::now();
                let completed = monitor.sleep_unless_closed(Duration::from_secs(30));
                (completed, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        monitor.close();

        let (completed, elapsed) = sleeper.join().expect("sleeper should finish");
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(30));
    }

    #[test]
    fn sleep_unless_closed_completes_while_open() {
        let monitor = QueueMonitor::new(8);
        assert!(monitor.sleep_unless_closed(Duration::from_millis(10)));
    }

    #[test]
    fn concurrent_producers_respect_capacity() {
        const CAPACITY: usize = 256;
        let monitor = Arc::new(QueueMonitor::new(CAPACITY));

        let producers: Vec<_> = (0..8u8)
            .map(|id| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || {
                    for round in 0..500usize {
                        let len = 1 + (round + id as usize) % 40;
                        let _ = monitor.offer(&vec![id; len]);
                        assert!(monitor.total_size() <= CAPACITY);
                    }
                })
            })
            .collect();

        let mut drained = 0usize;
        while producers.iter().any(|p| !p.is_finished()) {
            if let Some(chunk) = monitor.wait_pop_timeout(Duration::from_millis(5)) {
                drained += chunk.len();
            }
            assert!(monitor.total_size() <= CAPACITY);
        }
        for producer in producers {
            producer.join().expect("producer should finish");
        }

        let stats = monitor.stats();
        assert!(stats.buffered_bytes <= CAPACITY);
        assert_eq!(
            stats.accepted_bytes,
            stats.evicted_bytes + drained as u64 + stats.buffered_bytes as u64
        );
    }
}
