//! Tests for the subset-sum solvers and misc helpers

use crate::utils::{
    hour_and_day_for_ts, subset_closest_to_sum, subset_closest_to_sum2, RunningStats,
};

fn sums(subset: &[&u64]) -> u64 {
    subset.iter().map(|v| **v).sum()
}

#[test]
fn test_subset_exact_match() {
    let items = vec![1u64, 2, 3, 2, 1];
    let subset = subset_closest_to_sum(&items, 7, |v| *v, false, true);
    assert_eq!(sums(&subset), 7);
}

#[test]
fn test_subset_all_items_fit() {
    let items = vec![1u64, 2, 3];
    let subset = subset_closest_to_sum(&items, 100, |v| *v, false, true);
    assert_eq!(subset.len(), 3);
    assert_eq!(sums(&subset), 6);
}

#[test]
fn test_subset_upward_rounding() {
    // No subset sums to 4; the smallest sum above it is 5.
    let items = vec![3u64, 2, 3];
    let subset = subset_closest_to_sum(&items, 4, |v| *v, false, true);
    assert_eq!(sums(&subset), 5);
}

#[test]
fn test_subset_downward_rounding() {
    // No subset sums to 7; the largest sum below it is 6.
    let items = vec![4u64, 2, 4];
    let subset = subset_closest_to_sum(&items, 7, |v| *v, false, false);
    assert_eq!(sums(&subset), 6);
}

#[test]
fn test_subset_with_duplicates() {
    let items = vec![1u64];
    let subset = subset_closest_to_sum(&items, 8, |v| *v, true, true);
    assert_eq!(subset.len(), 8);
    assert_eq!(sums(&subset), 8);

    // Prefers fewer items for the same sum.
    let items = vec![1u64, 2];
    let subset = subset_closest_to_sum(&items, 8, |v| *v, true, true);
    assert_eq!(subset.len(), 4);
    assert_eq!(sums(&subset), 8);
}

#[test]
fn test_subset_on_records_with_key() {
    let items = vec![(1u64, 0u64), (2, 1), (3, 2)];
    let subset = subset_closest_to_sum(&items, 4, |item| item.0, false, true);
    let total: u64 = subset.iter().map(|item| item.0).sum();
    assert_eq!(total, 4);
}

#[test]
fn test_subset2_prefers_smaller_secondary_sum() {
    let items = vec![(3u64, 5.0), (3, 1.0), (2, 2.0), (2, 3.0), (2, 0.0), (2, 5.0)];
    let subset = subset_closest_to_sum2(&items, 9, |item| item.0, |item| item.1);

    let total: u64 = subset.iter().map(|item| item.0).sum();
    let secondary: f64 = subset.iter().map(|item| item.1).sum();
    assert_eq!(total, 9);
    assert!(secondary <= 6.0, "secondary sum {} too large", secondary);
}

#[test]
fn test_subset2_never_exceeds_target() {
    let items = vec![(4u64, 0.0), (4, 0.0)];
    let subset = subset_closest_to_sum2(&items, 7, |item| item.0, |item| item.1);
    let total: u64 = subset.iter().map(|item| item.0).sum();
    assert_eq!(total, 4);
}

#[test]
fn test_hour_and_day() {
    assert_eq!(hour_and_day_for_ts(0), (0, 0));
    assert_eq!(hour_and_day_for_ts(3600), (1, 0));
    assert_eq!(hour_and_day_for_ts(25 * 3600), (1, 1));
    assert_eq!(hour_and_day_for_ts(24 * 3600 - 1), (23, 0));
}

#[test]
fn test_running_stats() {
    let mut stats = RunningStats::new();
    assert_eq!(stats.avg(), 0.0);

    for value in [2.0, 4.0, 6.0] {
        stats.add_value(value);
    }

    assert_eq!(stats.count(), 3);
    assert_eq!(stats.sum(), 12.0);
    assert_eq!(stats.min(), 2.0);
    assert_eq!(stats.max(), 6.0);
    assert_eq!(stats.avg(), 4.0);
    assert!(stats.cov() > 0.0);
}
