use chrono::{DateTime, Duration, Utc};

use crate::models::Timestamped;

/// Rolling, time-indexed feed buffer.
///
/// Two halves: `pending` holds freshly arrived rows that the strategy cannot
/// see yet, `committed` holds rows promoted by an explicit [`apply`] call.
/// The caller (the aggregator) holds the strategy-wide lock around every
/// method, so no interior locking here.
///
/// [`apply`]: FeedBuffer::apply
#[derive(Debug)]
pub struct FeedBuffer<T> {
    name: &'static str,
    pending: Vec<T>,
    committed: Vec<T>,
    /// Committed rows older than `newest - retention` are purged on apply.
    /// A zero retention means "keep nothing".
    retention: Duration,
    /// Minimum committed time span required before learning may start
    min_history: Duration,
}

impl<T: Timestamped + Clone> FeedBuffer<T> {
    pub fn new(name: &'static str, retention: Duration, min_history: Duration) -> Self {
        Self {
            name,
            pending: Vec::new(),
            committed: Vec::new(),
            retention,
            min_history,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add freshly arrived rows to `pending`. Never blocks and touches only
    /// this buffer's own state.
    pub fn append(&mut self, items: impl IntoIterator<Item = T>) {
        self.pending.extend(items);
    }

    /// Rows awaiting promotion, in arrival order
    pub fn pending(&self) -> &[T] {
        &self.pending
    }

    /// Rows visible to the strategy, in timestamp order
    pub fn committed(&self) -> &[T] {
        &self.committed
    }

    /// Merge `pending` into `committed`, dedup by timestamp keeping the last
    /// written row, purge rows outside the retention window and clear
    /// `pending`. Returns the number of rows promoted.
    pub fn apply(&mut self) -> usize {
        let promoted = self.pending.len();
        if promoted > 0 {
            self.committed.append(&mut self.pending);
        }

        // Stable sort keeps arrival order among equal timestamps, so the
        // last-appended row wins the dedup below.
        self.committed.sort_by_key(|r| r.timestamp());

        let mut deduped: Vec<T> = Vec::with_capacity(self.committed.len());
        for row in self.committed.drain(..) {
            match deduped.last() {
                Some(last) if last.timestamp() == row.timestamp() => {
                    *deduped.last_mut().unwrap() = row;
                }
                _ => deduped.push(row),
            }
        }
        self.committed = deduped;

        if let Some(newest) = self.committed.last().map(|r| r.timestamp()) {
            if self.retention.is_zero() {
                // Zero window means keep nothing
                self.committed.clear();
            } else {
                let cutoff = newest - self.retention;
                self.committed.retain(|r| r.timestamp() >= cutoff);
            }
        }

        promoted
    }

    /// True iff committed data spans at least the configured minimum window
    pub fn has_min_history(&self) -> bool {
        match (self.committed.first(), self.committed.last()) {
            (Some(first), Some(last)) => {
                last.timestamp() - first.timestamp() >= self.min_history
            }
            _ => false,
        }
    }

    /// Newest timestamp across committed and pending rows
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        let committed = self.committed.last().map(|r| r.timestamp());
        let pending = self.pending.iter().map(|r| r.timestamp()).max();
        committed.max(pending)
    }

    /// True iff data has arrived within `max_staleness` of `now`. Health
    /// check only, independent of whether the data has been applied yet.
    pub fn is_alive(&self, max_staleness: Duration, now: DateTime<Utc>) -> bool {
        match self.last_timestamp() {
            Some(last) => now - last < max_staleness,
            // Not started yet is not dead
            None => true,
        }
    }
}
