//! First-seen bookkeeping for duplicate detection

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// A value seen again at `index`, first seen at `first`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicatePair {
    pub first: usize,
    pub index: usize,
    pub value: String,
}

/// Tracks the first index at which each value was seen
#[derive(Debug, Default)]
pub struct DuplicateTracker {
    first_seen: HashMap<String, usize>,
    pairs: Vec<DuplicatePair>,
}

impl DuplicateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` at `index`. Empty values are ignored. Returns true
    /// when the value had already been seen.
    pub fn observe(&mut self, index: usize, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        match self.first_seen.get(value) {
            Some(&first) => {
                self.pairs.push(DuplicatePair {
                    first,
                    index,
                    value: value.to_string(),
                });
                true
            }
            None => {
                self.first_seen.insert(value.to_string(), index);
                false
            }
        }
    }

    pub fn first_seen(&self, value: &str) -> Option<usize> {
        self.first_seen.get(value).copied()
    }

    pub fn pairs(&self) -> &[DuplicatePair] {
        &self.pairs
    }

    pub fn into_pairs(self) -> Vec<DuplicatePair> {
        self.pairs
    }
}

/// Duplicate pairs grouped by value: every index carrying the value, the
/// first occurrence included, in ascending order
pub fn group_pairs(pairs: &[DuplicatePair]) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for pair in pairs {
        let indices = groups.entry(pair.value.clone()).or_default();
        if indices.is_empty() {
            indices.push(pair.first);
        }
        indices.push(pair.index);
    }
    for indices in groups.values_mut() {
        indices.sort_unstable();
        indices.dedup();
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_occurrence_pairs_with_first() {
        let mut tracker = DuplicateTracker::new();
        for (i, id) in ["a", "b", "X", "c", "d", "X"].iter().enumerate() {
            tracker.observe(i, id);
        }
        assert_eq!(
            tracker.pairs(),
            &[DuplicatePair {
                first: 2,
                index: 5,
                value: "X".to_string()
            }]
        );
        assert_eq!(tracker.first_seen("X"), Some(2));
    }

    #[test]
    fn test_third_occurrence_pairs_with_first() {
        let mut tracker = DuplicateTracker::new();
        assert!(!tracker.observe(0, "x"));
        assert!(tracker.observe(1, "x"));
        assert!(tracker.observe(4, "x"));
        let firsts: Vec<usize> = tracker.pairs().iter().map(|p| p.first).collect();
        assert_eq!(firsts, vec![0, 0]);
    }

    #[test]
    fn test_empty_values_ignored() {
        let mut tracker = DuplicateTracker::new();
        assert!(!tracker.observe(0, ""));
        assert!(!tracker.observe(1, ""));
        assert!(tracker.into_pairs().is_empty());
    }

    #[test]
    fn test_group_pairs() {
        let mut tracker = DuplicateTracker::new();
        for (i, v) in ["a", "b", "a", "b", "a"].iter().enumerate() {
            tracker.observe(i, v);
        }
        let groups = group_pairs(tracker.pairs());
        assert_eq!(groups["a"], vec![0, 2, 4]);
        assert_eq!(groups["b"], vec![1, 3]);
    }
}
