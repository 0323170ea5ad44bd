//! Position discovery over the protocol's sorted borrower list.
//!
//! The list is sorted ascending by collateral ratio, so liquidatable
//! borrowers form a contiguous run starting at the tail. The walk goes
//! tail to head and stops at the first safe entry once that run has
//! started, after `early_exit_threshold` entries with nothing found, or at
//! the hard `max_to_scan` cap. A visited set guards against a malformed
//! list that loops back on itself.

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use keeper_chain::SortedPositions;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::u256_math::{is_liquidatable, is_underwater};

/// A visited borrower and its ratio at the run's price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub address: Address,
    pub ratio: U256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub scanned: usize,
    pub liquidatable: usize,
    /// Entries below 100% (collateral worth less than debt)
    pub below_threshold: usize,
    pub early_exit: bool,
    /// Stopped by `max_to_scan`
    pub capped: bool,
    /// Stopped because the list revisited a node
    pub cycle_detected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    /// Riskiest first
    pub liquidatable: Vec<Candidate>,
    pub stats: ScanStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    pub max_to_scan: usize,
    /// `None` disables early exit
    pub early_exit_threshold: Option<usize>,
}

pub struct PositionScanner {
    positions: Arc<dyn SortedPositions>,
}

impl PositionScanner {
    pub fn new(positions: Arc<dyn SortedPositions>) -> Self {
        Self { positions }
    }

    /// Walk the list from its tail and collect liquidatable borrowers.
    pub async fn scan(&self, price: U256, limits: &ScanLimits) -> Result<DiscoveryResult> {
        let mut result = DiscoveryResult::default();
        let mut visited = HashSet::new();

        let mut cursor = self.positions.last().await.context("reading list tail")?;

        while let Some(id) = cursor {
            if result.stats.scanned >= limits.max_to_scan {
                result.stats.capped = true;
                break;
            }
            if !visited.insert(id) {
                warn!(borrower = %id, scanned = result.stats.scanned, "Sorted list cycle detected");
                result.stats.cycle_detected = true;
                break;
            }

            let ratio = self
                .positions
                .ratio(id, price)
                .await
                .with_context(|| format!("reading ratio for {id}"))?;
            result.stats.scanned += 1;

            if is_underwater(ratio) {
                result.stats.below_threshold += 1;
            }

            if is_liquidatable(ratio) {
                result.liquidatable.push(Candidate { address: id, ratio });
            } else if !result.liquidatable.is_empty() {
                // Crossed the boundary; nothing deeper can be liquidatable
                debug!(borrower = %id, ratio = %ratio, "First safe entry after liquidatable run");
                break;
            }

            if result.liquidatable.is_empty()
                && limits
                    .early_exit_threshold
                    .is_some_and(|t| result.stats.scanned >= t)
            {
                result.stats.early_exit = true;
                break;
            }

            cursor = self
                .positions
                .prev(id)
                .await
                .with_context(|| format!("reading predecessor of {id}"))?;
        }

        result.stats.liquidatable = result.liquidatable.len();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{addr, pct, MockList};

    fn limits(max: usize, early: Option<usize>) -> ScanLimits {
        ScanLimits {
            max_to_scan: max,
            early_exit_threshold: early,
        }
    }

    fn scanner(list: MockList) -> (PositionScanner, Arc<MockList>) {
        let list = Arc::new(list);
        (PositionScanner::new(list.clone()), list)
    }

    /// Tail-first list from percentages.
    fn list(ratios: &[u64]) -> MockList {
        let entries: Vec<_> = ratios
            .iter()
            .enumerate()
            .map(|(i, r)| (addr(i as u64 + 1), pct(*r)))
            .collect();
        MockList::from_tail(&entries)
    }

    #[tokio::test]
    async fn test_tail_segment() {
        // Sorted ascending from the tail: the liquidatable run is the first three
        let ratios = [95, 105, 109, 111, 130, 150, 200];
        let (s, l) = scanner(list(&ratios));

        let result = s.scan(U256::from(1u64), &limits(100, None)).await.unwrap();
        let found: Vec<_> = result.liquidatable.iter().map(|c| c.address).collect();
        assert_eq!(found, vec![addr(1), addr(2), addr(3)]);
        assert_eq!(result.stats.liquidatable, 3);
        assert_eq!(result.stats.below_threshold, 1);

        // Stops at the first safe entry, never reads deeper
        assert_eq!(result.stats.scanned, 4);
        assert_eq!(l.visited(), vec![addr(1), addr(2), addr(3), addr(4)]);
    }

    #[tokio::test]
    async fn test_tail_segment_for_generated_lists() {
        // Every split point of a sorted list yields exactly its prefix
        for split in 0..=12u64 {
            let mut ratios: Vec<u64> = (0..split).map(|i| 80 + i * 2).collect();
            ratios.extend((0..12 - split).map(|i| 110 + i * 5));
            let (s, _) = scanner(list(&ratios));

            let result = s.scan(U256::from(1u64), &limits(100, None)).await.unwrap();
            assert_eq!(result.liquidatable.len() as u64, split);
            // Without early exit a clean list is walked to the head
            let expected_scanned = if split == 0 || split == 12 { 12 } else { split + 1 };
            assert_eq!(result.stats.scanned as u64, expected_scanned);
            for (i, c) in result.liquidatable.iter().enumerate() {
                assert_eq!(c.address, addr(i as u64 + 1));
            }
        }
    }

    #[tokio::test]
    async fn test_early_exit_on_clean_tail() {
        let ratios = [150, 160, 170, 180, 190, 200];
        let (s, l) = scanner(list(&ratios));

        let result = s.scan(U256::from(1u64), &limits(100, Some(3))).await.unwrap();
        assert!(result.liquidatable.is_empty());
        assert!(result.stats.early_exit);
        assert_eq!(result.stats.scanned, 3);
        assert_eq!(l.visited().len(), 3);
    }

    #[tokio::test]
    async fn test_early_exit_not_taken_once_found() {
        let ratios = [100, 101, 102, 103, 104, 150];
        let (s, _) = scanner(list(&ratios));

        let result = s.scan(U256::from(1u64), &limits(100, Some(2))).await.unwrap();
        assert_eq!(result.liquidatable.len(), 5);
        assert!(!result.stats.early_exit);
    }

    #[tokio::test]
    async fn test_scan_cap() {
        let ratios = [90; 10];
        let (s, l) = scanner(list(&ratios));

        let result = s.scan(U256::from(1u64), &limits(4, None)).await.unwrap();
        assert_eq!(result.stats.scanned, 4);
        assert_eq!(result.liquidatable.len(), 4);
        assert!(result.stats.capped);
        assert_eq!(l.visited().len(), 4);
    }

    #[tokio::test]
    async fn test_cycle_guard() {
        let mut l = list(&[90, 95, 100]);
        // Head points back at the tail
        l.prev.insert(addr(3), addr(1));
        let (s, l) = scanner(l);

        let result = s.scan(U256::from(1u64), &limits(100, None)).await.unwrap();
        assert!(result.stats.cycle_detected);
        assert_eq!(result.liquidatable.len(), 3);
        assert_eq!(l.visited().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_list() {
        let (s, _) = scanner(MockList::default());
        let result = s.scan(U256::from(1u64), &limits(100, Some(5))).await.unwrap();
        assert_eq!(result, DiscoveryResult::default());
    }

    #[tokio::test]
    async fn test_read_failure_propagates() {
        let mut l = list(&[90, 95, 120]);
        l.fail_ratio_for = Some(addr(2));
        let (s, _) = scanner(l);
        assert!(s.scan(U256::from(1u64), &limits(100, None)).await.is_err());
    }
}
