use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::event::LogEvent;

struct Ring {
    events: VecDeque<LogEvent>,
    last_touched: Instant,
    evicted: bool,
}

/// Fixed-capacity ring of recent events for one logical context
///
/// Guarded by its own lock, never taken while the registry lock is held.
pub struct ContextBuffer {
    key: Arc<str>,
    capacity: usize,
    ring: Mutex<Ring>,
}

impl ContextBuffer {
    pub fn new(key: Arc<str>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            key,
            capacity,
            ring: Mutex::new(Ring {
                events: VecDeque::new(),
                last_touched: Instant::now(),
                evicted: false,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an event, dropping the oldest one when full
    ///
    /// Hands the event back if this buffer has already been evicted from the
    /// registry.
    pub fn push(&self, event: LogEvent) -> Result<(), LogEvent> {
        let mut ring = self.lock();
        if ring.evicted {
            return Err(event);
        }

        if ring.events.len() == self.capacity {
            ring.events.pop_front();
        }
        ring.events.push_back(event);
        ring.last_touched = Instant::now();
        Ok(())
    }

    /// Remove and return every retained event, oldest first
    pub fn drain(&self) -> Vec<LogEvent> {
        let mut ring = self.lock();
        ring.last_touched = Instant::now();
        ring.events.drain(..).collect()
    }

    /// Discard retained events and refuse further pushes
    ///
    /// Returns the number of events discarded.
    pub fn evict(&self) -> usize {
        let mut ring = self.lock();
        ring.evicted = true;
        let discarded = ring.events.len();
        ring.events.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Milliseconds since the last push or drain
    pub fn idle_ms(&self) -> u64 {
        self.lock().last_touched.elapsed().as_millis() as u64
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Severity;

    fn buffer(capacity: usize) -> ContextBuffer {
        ContextBuffer::new(Arc::from("ctx"), capacity)
    }

    fn messages(events: &[LogEvent]) -> Vec<&str> {
        events.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_drain_returns_oldest_first() {
        let buffer = buffer(4);
        for i in 0..3 {
            buffer.push(LogEvent::new(Severity::Debug, format!("e{i}"))).unwrap();
        }

        let drained = buffer.drain();
        assert_eq!(messages(&drained), ["e0", "e1", "e2"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_full_ring_keeps_most_recent() {
        let buffer = buffer(3);
        for i in 0..7 {
            buffer.push(LogEvent::new(Severity::Debug, format!("e{i}"))).unwrap();
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(messages(&buffer.drain()), ["e4", "e5", "e6"]);
    }

    #[test]
    fn test_evicted_buffer_rejects_pushes() {
        let buffer = buffer(3);
        buffer.push(LogEvent::new(Severity::Debug, "kept")).unwrap();

        assert_eq!(buffer.evict(), 1);
        assert!(buffer.is_empty());

        let rejected = buffer.push(LogEvent::new(Severity::Debug, "late")).unwrap_err();
        assert_eq!(rejected.message, "late");
    }

    #[test]
    fn test_ring_grows_on_demand() {
        let buffer = buffer(10_000);
        assert_eq!(buffer.ring.lock().unwrap().events.capacity(), 0);

        buffer.push(LogEvent::new(Severity::Debug, "one")).unwrap();
        assert!(buffer.ring.lock().unwrap().events.capacity() < 10_000);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = buffer(0);
        assert_eq!(buffer.capacity(), 1);

        buffer.push(LogEvent::new(Severity::Debug, "a")).unwrap();
        buffer.push(LogEvent::new(Severity::Debug, "b")).unwrap();
        assert_eq!(messages(&buffer.drain()), ["b"]);
    }
}
