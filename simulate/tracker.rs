use ahash::{AHashMap, AHashSet};

/// Which id a tracker is keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingAxis {
    /// Key = CpG id, counterparts = samples perturbed at that CpG.
    Cpg,
    /// Key = sample id, counterparts = CpGs already perturbed in that sample.
    Sample,
}

/// Remembers which counterparts have already been consumed for each key.
///
/// Records only ever grow. A tracker that must survive several iterations is
/// simply kept alive by the caller; dropping it is the only way to reset it.
#[derive(Clone, Debug)]
pub struct SelectionTracker {
    axis: TrackingAxis,
    consumed: AHashMap<String, AHashSet<String>>,
    total: usize,
}

impl SelectionTracker {
    pub fn new(axis: TrackingAxis) -> Self {
        Self {
            axis,
            consumed: AHashMap::new(),
            total: 0,
        }
    }

    pub fn axis(&self) -> TrackingAxis {
        self.axis
    }

    pub fn is_available(&self, key: &str, counterpart: &str) -> bool {
        self.consumed
            .get(key)
            .is_none_or(|used| !used.contains(counterpart))
    }

    /// Records a pair. Returns false if it had been recorded before.
    pub fn record(&mut self, key: &str, counterpart: &str) -> bool {
        let inserted = match self.consumed.get_mut(key) {
            Some(used) => used.insert(counterpart.to_string()),
            None => {
                let mut used = AHashSet::new();
                used.insert(counterpart.to_string());
                self.consumed.insert(key.to_string(), used);
                true
            }
        };
        if inserted {
            self.total += 1;
        }
        inserted
    }

    /// Number of counterparts consumed for `key`.
    pub fn consumed_count(&self, key: &str) -> usize {
        self.consumed.get(key).map_or(0, |used| used.len())
    }

    pub fn total_recorded(&self) -> usize {
        self.total
    }

    pub fn tracked_keys(&self) -> usize {
        self.consumed.len()
    }
}
