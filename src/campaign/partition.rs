//! Range arithmetic: node shards and worker batches.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Inclusive range of candidate units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRange {
    pub start: u64,
    pub end: u64,
}

impl UnitRange {
    /// # Errors
    ///
    /// `QueueError::InvalidRange` when `start > end`.
    pub fn new(start: u64, end: u64) -> Result<Self, QueueError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Re-checks the bounds, for ranges that arrived through deserialization.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.start > self.end {
            return Err(QueueError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Number of units, saturating at `u64::MAX` for the full domain.
    /// An inverted range has no units.
    pub fn len(&self) -> u64 {
        self.end
            .checked_sub(self.start)
            .map_or(0, |span| span.saturating_add(1))
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, unit: u64) -> bool {
        (self.start..=self.end).contains(&unit)
    }

    pub fn iter(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }
}

impl fmt::Display for UnitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Splits `range` into one shard per node.
///
/// Each node gets `ceil(len / total_nodes)` units and the last node takes the
/// remainder. Nodes whose shard would start past `range.end` get nothing, so
/// the result may be shorter than `total_nodes`. Node ids are 1-based.
pub fn split_range_across_nodes(range: UnitRange, total_nodes: usize) -> Vec<(usize, UnitRange)> {
    if range.is_empty() {
        return Vec::new();
    }
    let total_nodes = total_nodes.max(1) as u128;
    let len = (range.end - range.start) as u128 + 1;
    let per_node = len.div_ceil(total_nodes);

    let mut shards = Vec::new();
    for idx in 0..total_nodes {
        let start = range.start as u128 + idx * per_node;
        if start > range.end as u128 {
            break;
        }
        let end = (start + per_node - 1).min(range.end as u128);
        shards.push((
            idx as usize + 1,
            UnitRange {
                start: start as u64,
                end: end as u64,
            },
        ));
    }
    shards
}

/// Chunks `units` into batches of `ceil(len / worker_count)`.
///
/// Every unit lands in exactly one batch and order is preserved. Fewer than
/// `worker_count` batches come back when the units don't fill them all.
pub fn chunk_units(units: Vec<u64>, worker_count: usize) -> Vec<Vec<u64>> {
    if units.is_empty() {
        return Vec::new();
    }
    let batch_size = units.len().div_ceil(worker_count.max(1));
    units.chunks(batch_size).map(<[u64]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_unit_range_validation() {
        assert!(UnitRange::new(5, 5).is_ok());
        assert!(matches!(
            UnitRange::new(6, 5),
            Err(QueueError::InvalidRange { start: 6, end: 5 })
        ));
        assert_eq!(UnitRange::new(0, 9999).unwrap().len(), 10_000);
        assert_eq!(UnitRange::new(0, u64::MAX).unwrap().len(), u64::MAX);
    }

    #[test]
    fn test_inverted_range_has_no_units() {
        let inverted: UnitRange = serde_json::from_str(r#"{"start": 9, "end": 1}"#).unwrap();
        assert_eq!(inverted.len(), 0);
        assert!(inverted.is_empty());
        assert!(split_range_across_nodes(inverted, 2).is_empty());
    }

    #[test]
    fn test_split_two_nodes() {
        let shards = split_range_across_nodes(UnitRange::new(0, 9999).unwrap(), 2);
        assert_eq!(
            shards,
            vec![
                (1, UnitRange { start: 0, end: 4999 }),
                (2, UnitRange { start: 5000, end: 9999 }),
            ]
        );
    }

    #[test]
    fn test_split_uneven_and_sparse() {
        let shards = split_range_across_nodes(UnitRange::new(0, 9).unwrap(), 3);
        assert_eq!(
            shards,
            vec![
                (1, UnitRange { start: 0, end: 3 }),
                (2, UnitRange { start: 4, end: 7 }),
                (3, UnitRange { start: 8, end: 9 }),
            ]
        );

        // ceil(2 / 4) = 1 per node; nodes 3 and 4 get nothing.
        let sparse = split_range_across_nodes(UnitRange::new(10, 11).unwrap(), 4);
        assert_eq!(sparse.len(), 2);
        assert_eq!(sparse[1], (2, UnitRange { start: 11, end: 11 }));
    }

    #[test]
    fn test_split_full_domain_does_not_overflow() {
        let shards = split_range_across_nodes(UnitRange::new(0, u64::MAX).unwrap(), 3);
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[2].1.end, u64::MAX);
        assert_eq!(shards[1].1.start, shards[0].1.end + 1);
    }

    #[test]
    fn test_chunk_sizes_match_worker_split() {
        let batches = chunk_units((0..5000).collect(), 3);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1667, 1667, 1666]);
    }

    #[test]
    fn test_chunk_coverage_exactly_once() {
        for worker_count in 1..8 {
            let units: Vec<u64> = (0..23).filter(|u| u % 3 != 0).collect();
            let batches = chunk_units(units.clone(), worker_count);
            assert!(batches.len() <= worker_count);

            let flat: Vec<u64> = batches.into_iter().flatten().collect();
            assert_eq!(flat, units);
            let unique: HashSet<u64> = flat.iter().copied().collect();
            assert_eq!(unique.len(), units.len());
        }
    }

    #[test]
    fn test_chunk_empty() {
        assert!(chunk_units(Vec::new(), 4).is_empty());
    }
}
