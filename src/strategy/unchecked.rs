use chrono::Duration;

use crate::models::{FeatureRow, TargetRow, Timestamped};

/// Training-set accumulator with a quarantine for unlabeled rows.
///
/// A feature row produced during a processing cycle cannot be labeled yet,
/// its label horizon lies in the future. Rows wait in `unchecked` until
/// labels for their timestamps exist, then move into the checked x/y set the
/// learner trains on. The checked set is bounded by the learn window.
pub struct TrainingSet {
    learn_window: Duration,
    unchecked: Vec<FeatureRow>,
    x: Vec<FeatureRow>,
    y: Vec<TargetRow>,
}

impl TrainingSet {
    pub fn new(learn_window: Duration) -> Self {
        Self {
            learn_window,
            unchecked: Vec::new(),
            x: Vec::new(),
            y: Vec::new(),
        }
    }

    /// Queue a fresh, still-unlabeled feature row. Same timestamp replaces
    /// the previous row (last write wins).
    pub fn push_unchecked(&mut self, row: FeatureRow) {
        match self
            .unchecked
            .iter_mut()
            .find(|r| r.timestamp == row.timestamp)
        {
            Some(existing) => *existing = row,
            None => self.unchecked.push(row),
        }
    }

    /// Move every quarantined row whose label now exists into the checked
    /// set, then trim the checked set to the learn window. Returns how many
    /// rows were promoted.
    pub fn promote(&mut self, labels: &[TargetRow]) -> usize {
        let mut promoted = 0;
        let mut i = 0;
        while i < self.unchecked.len() {
            let ts = self.unchecked[i].timestamp;
            match labels.iter().find(|l| l.timestamp == ts) {
                Some(label) => {
                    self.x.push(self.unchecked.remove(i));
                    self.y.push(label.clone());
                    promoted += 1;
                }
                None => i += 1,
            }
        }

        if let Some(newest) = self.x.iter().map(|r| r.timestamp()).max() {
            let cutoff = newest - self.learn_window;
            // x and y stay index-aligned
            let keep: Vec<bool> = self.x.iter().map(|r| r.timestamp >= cutoff).collect();
            let mut it = keep.iter();
            self.x.retain(|_| *it.next().unwrap());
            let mut it = keep.iter();
            self.y.retain(|_| *it.next().unwrap());
        }
        promoted
    }

    pub fn checked(&self) -> (&[FeatureRow], &[TargetRow]) {
        (&self.x, &self.y)
    }

    pub fn checked_len(&self) -> usize {
        self.x.len()
    }

    pub fn unchecked_len(&self) -> usize {
        self.unchecked.len()
    }
}
