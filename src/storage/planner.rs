//! Index selection and scan ranges.

use smallvec::SmallVec;

use super::order::{IndexId, IndexKey};
use crate::types::{Column, NodeId};

/// Picks the physical index used to answer a pattern.
pub trait IndexSelector: Send + Sync {
    /// Chooses one of `registered` given which quad positions are bound.
    fn select(&self, registered: &[IndexId], bound: [bool; 4]) -> IndexId;
}

/// Chooses the index whose key prefix covers the most bound columns, lowest id on ties.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrefixCoverage;

impl IndexSelector for PrefixCoverage {
    fn select(&self, registered: &[IndexId], bound: [bool; 4]) -> IndexId {
        let mut best = IndexId::Spog;
        let mut best_len = None;
        for &id in registered {
            let len = id.prefix_len(bound);
            let better = match best_len {
                None => true,
                Some(current) => len > current || (len == current && id.id() < best.id()),
            };
            if better {
                best = id;
                best_len = Some(len);
            }
        }
        best
    }
}

/// Which quad positions of `pattern` are bound.
pub fn bound_mask(pattern: [NodeId; 4]) -> [bool; 4] {
    pattern.map(|n| !n.is_none())
}

/// A range scan over one index plus the residual filter for bound columns outside the
/// key prefix.
#[derive(Clone, Debug)]
pub struct ScanPlan {
    index: IndexId,
    lo: IndexKey,
    prefix: usize,
    pattern: [NodeId; 4],
    residual: bool,
}

impl ScanPlan {
    /// Plans a scan of `index` for `pattern` (S,P,O,G order, `NONE` = wildcard).
    pub fn new(index: IndexId, pattern: [NodeId; 4]) -> Self {
        let bound = bound_mask(pattern);
        let prefix = index.prefix_len(bound);
        let mut lo = index.permute(pattern);
        lo[prefix..].fill(NodeId::NONE.0);
        let residual = bound.iter().filter(|b| **b).count() > prefix;
        Self {
            index,
            lo,
            prefix,
            pattern,
            residual,
        }
    }

    /// The scanned index.
    pub fn index(&self) -> IndexId {
        self.index
    }

    /// Smallest key that can match.
    pub fn lo(&self) -> &IndexKey {
        &self.lo
    }

    /// Number of leading key columns fixed by the pattern.
    pub fn prefix(&self) -> usize {
        self.prefix
    }

    /// True when some bound column is outside the key prefix.
    pub fn has_residual(&self) -> bool {
        self.residual
    }

    /// False once the scan has moved past every key sharing the bound prefix.
    pub fn in_range(&self, key: &IndexKey) -> bool {
        key[..self.prefix] == self.lo[..self.prefix]
    }

    /// True when `key` agrees with every bound column.
    pub fn matches(&self, key: &IndexKey) -> bool {
        if !self.residual {
            return true;
        }
        self.index
            .columns()
            .iter()
            .zip(key.iter())
            .all(|(column, value)| {
                let want = self.pattern[column.position()];
                want.is_none() || want.0 == *value
            })
    }

    /// Unbound columns in index order; these are the cursor's output columns.
    pub fn free_columns(&self) -> SmallVec<[Column; 4]> {
        self.index
            .columns()
            .into_iter()
            .filter(|c| self.pattern[c.position()].is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_longest_prefix_then_lowest_id() {
        let all = IndexId::ALL;
        assert_eq!(
            PrefixCoverage.select(&all, [false, true, true, false]),
            IndexId::Posg
        );
        assert_eq!(
            PrefixCoverage.select(&all, [false, false, false, false]),
            IndexId::Spog
        );
        assert_eq!(
            PrefixCoverage.select(&all, [false, false, false, true]),
            IndexId::Gspo
        );
        assert_eq!(
            PrefixCoverage.select(&[IndexId::Gosp, IndexId::Ospg], [true, true, false, false]),
            IndexId::Ospg
        );
    }

    #[test]
    fn plan_splits_prefix_from_residual() {
        let pattern = [NodeId(1), NodeId::NONE, NodeId(3), NodeId::NONE];
        let plan = ScanPlan::new(IndexId::Spog, pattern);
        assert_eq!(plan.prefix(), 1);
        assert!(plan.has_residual());
        assert_eq!(plan.lo(), &[1, 0, 0, 0]);
        assert!(plan.in_range(&[1, 9, 3, 2]));
        assert!(plan.matches(&[1, 9, 3, 2]));
        assert!(!plan.matches(&[1, 9, 4, 2]));
        assert!(!plan.in_range(&[2, 0, 0, 0]));
        assert_eq!(
            plan.free_columns().as_slice(),
            &[Column::Predicate, Column::Graph]
        );
    }
}
