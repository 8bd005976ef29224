//! Time-ordered rolling window of state snapshots.
//!
//! After every mutation the buffer is sorted ascending by local time and
//! holds nothing older than `now - history_ms`.

use crate::protocol::messages::StateSnapshot;

/// A snapshot together with its send time mapped onto the local clock.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedEntry {
    pub local_time_ms: f64,
    pub snapshot: StateSnapshot,
}

/// Why an insert was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Older than the trailing window.
    TooOld,
    /// A snapshot with the same `seq` is already buffered.
    Duplicate,
}

/// Sorted, windowed snapshot buffer.
#[derive(Debug, Clone)]
pub struct DelayBuffer {
    entries: Vec<BufferedEntry>,
    history_ms: f64,
}

impl DelayBuffer {
    pub fn new(history_ms: f64) -> Self {
        Self {
            entries: Vec::new(),
            history_ms,
        }
    }

    /// Inserts an entry in time order, then prunes anything outside the window.
    pub fn insert(&mut self, entry: BufferedEntry, now_ms: f64) -> InsertOutcome {
        self.prune(now_ms);
        if entry.local_time_ms < now_ms - self.history_ms {
            return InsertOutcome::TooOld;
        }
        if self
            .entries
            .iter()
            .any(|e| e.snapshot.seq == entry.snapshot.seq)
        {
            return InsertOutcome::Duplicate;
        }
        let index = self
            .entries
            .partition_point(|e| e.local_time_ms <= entry.local_time_ms);
        self.entries.insert(index, entry);
        InsertOutcome::Inserted
    }

    /// Drops entries older than `now_ms - history_ms`.
    pub fn prune(&mut self, now_ms: f64) {
        let cutoff = now_ms - self.history_ms;
        let stale = self.entries.partition_point(|e| e.local_time_ms < cutoff);
        if stale > 0 {
            self.entries.drain(..stale);
        }
    }

    /// Returns `(previous, next)` around `target_ms`.
    ///
    /// `previous` is the latest entry with `time <= target`; `next` is the
    /// earliest entry with `time >= target`.  Both are the same entry when
    /// one sits exactly on the target.
    pub fn bracket(&self, target_ms: f64) -> (Option<&BufferedEntry>, Option<&BufferedEntry>) {
        let after_prev = self
            .entries
            .partition_point(|e| e.local_time_ms <= target_ms);
        let previous = after_prev.checked_sub(1).and_then(|i| self.entries.get(i));
        let first_next = self
            .entries
            .partition_point(|e| e.local_time_ms < target_ms);
        (previous, self.entries.get(first_next))
    }

    pub fn newest(&self) -> Option<&BufferedEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[BufferedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{Pose, Velocity};

    fn entry(seq: u32, t: f64) -> BufferedEntry {
        BufferedEntry {
            local_time_ms: t,
            snapshot: StateSnapshot::new(seq, None, Pose::default(), Velocity::default()),
        }
    }

    fn times(buffer: &DelayBuffer) -> Vec<f64> {
        buffer.entries().iter().map(|e| e.local_time_ms).collect()
    }

    #[test]
    fn test_insert_keeps_time_order() {
        // Arrange
        let mut buffer = DelayBuffer::new(2000.0);

        // Act – arrive out of order
        for (seq, t) in [(3, 300.0), (1, 100.0), (4, 400.0), (2, 200.0)] {
            assert_eq!(buffer.insert(entry(seq, t), 500.0), InsertOutcome::Inserted);
        }

        // Assert
        assert_eq!(times(&buffer), vec![100.0, 200.0, 300.0, 400.0]);
    }

    #[test]
    fn test_insert_rejects_duplicate_seq() {
        let mut buffer = DelayBuffer::new(2000.0);
        buffer.insert(entry(7, 100.0), 100.0);
        assert_eq!(buffer.insert(entry(7, 120.0), 120.0), InsertOutcome::Duplicate);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_insert_rejects_entry_outside_window() {
        let mut buffer = DelayBuffer::new(2000.0);
        assert_eq!(buffer.insert(entry(1, 0.0), 2500.0), InsertOutcome::TooOld);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_prune_drops_old_entries() {
        // Arrange
        let mut buffer = DelayBuffer::new(2000.0);
        buffer.insert(entry(1, 0.0), 0.0);
        buffer.insert(entry(2, 1000.0), 1000.0);
        buffer.insert(entry(3, 2000.0), 2000.0);

        // Act
        buffer.prune(3500.0);

        // Assert
        assert_eq!(times(&buffer), vec![2000.0]);
    }

    #[test]
    fn test_bracket_between_entries() {
        let mut buffer = DelayBuffer::new(2000.0);
        buffer.insert(entry(1, 100.0), 300.0);
        buffer.insert(entry(2, 200.0), 300.0);

        let (prev, next) = buffer.bracket(150.0);

        assert_eq!(prev.map(|e| e.snapshot.seq), Some(1));
        assert_eq!(next.map(|e| e.snapshot.seq), Some(2));
    }

    #[test]
    fn test_bracket_exact_hit_returns_same_entry() {
        let mut buffer = DelayBuffer::new(2000.0);
        buffer.insert(entry(1, 100.0), 300.0);
        buffer.insert(entry(2, 200.0), 300.0);

        let (prev, next) = buffer.bracket(200.0);

        assert_eq!(prev.map(|e| e.snapshot.seq), Some(2));
        assert_eq!(next.map(|e| e.snapshot.seq), Some(2));
    }

    #[test]
    fn test_bracket_outside_range() {
        let mut buffer = DelayBuffer::new(2000.0);
        buffer.insert(entry(1, 100.0), 300.0);

        let (before_prev, before_next) = buffer.bracket(50.0);
        let (after_prev, after_next) = buffer.bracket(250.0);

        assert!(before_prev.is_none());
        assert_eq!(before_next.map(|e| e.snapshot.seq), Some(1));
        assert_eq!(after_prev.map(|e| e.snapshot.seq), Some(1));
        assert!(after_next.is_none());
    }

    #[test]
    fn test_clear_empties_buffer() {
        let mut buffer = DelayBuffer::new(2000.0);
        buffer.insert(entry(1, 100.0), 100.0);
        buffer.clear();
        assert!(buffer.newest().is_none());
    }
}
