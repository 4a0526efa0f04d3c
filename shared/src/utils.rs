//! Generic helpers: best-effort subset-sum solvers, virtual-time calendar
//! math and running statistics.
//!
//! The subset-sum solvers are the heart of best-effort provisioning. Both
//! are dynamic programming over reachable sums and are deterministic given
//! input order, which the resource manager relies on for reproducible
//! provisioning sequences.

use std::collections::BTreeMap;

/// Returns a subset of `items` whose key-sum equals `target` when possible.
/// Otherwise, with `gt` the subset with the smallest sum above `target` is
/// returned, without `gt` the subset with the largest sum below it. With
/// `with_duplicates` every item may be picked any number of times (and the
/// result rounds upward when the target is not reachable exactly).
pub fn subset_closest_to_sum<'a, T, K>(
    items: &'a [T],
    target: u64,
    key: K,
    with_duplicates: bool,
    gt: bool,
) -> Vec<&'a T>
where
    K: Fn(&T) -> u64,
{
    if with_duplicates {
        return subset_with_sum_with_duplicates(items, target, key);
    }

    // Everything fits: no search needed.
    if items.iter().map(&key).sum::<u64>() <= target {
        return items.iter().collect();
    }

    let mut reachable: BTreeMap<u64, Vec<&T>> = BTreeMap::new();
    reachable.insert(0, Vec::new());

    let mut closest_sum: Option<u64> = None;
    let mut closest: Vec<&T> = Vec::new();

    for item in items {
        // Walk sums from large to small so an item extends only subsets
        // built from previous items.
        let sums: Vec<u64> = reachable.keys().rev().copied().collect();
        for number in sums {
            let result = key(item) + number;

            if result > target {
                if gt && closest_sum.is_none_or(|c| result < c) {
                    closest_sum = Some(result);
                    closest = extended(&reachable[&number], item);
                }
            } else if result == target {
                return extended(&reachable[&number], item);
            } else {
                if !gt && closest_sum.is_none_or(|c| result > c) {
                    closest_sum = Some(result);
                    closest = extended(&reachable[&number], item);
                }
                let subset = extended(&reachable[&number], item);
                reachable.insert(result, subset);
            }
        }
    }

    closest
}

fn subset_with_sum_with_duplicates<'a, T, K>(items: &'a [T], target: u64, key: K) -> Vec<&'a T>
where
    K: Fn(&T) -> u64,
{
    let mut by_key_desc: Vec<&T> = items.iter().collect();
    by_key_desc.sort_by(|a, b| key(b).cmp(&key(a)));

    let mut reachable: BTreeMap<u64, Vec<&T>> = BTreeMap::new();
    reachable.insert(0, Vec::new());

    let mut closest_sum: Option<u64> = None;
    let mut closest: Vec<&T> = Vec::new();

    let mut added_something = true;
    while added_something {
        added_something = false;
        let sums: Vec<u64> = reachable.keys().rev().copied().collect();
        for number in sums {
            for &item in &by_key_desc {
                let result = key(item) + number;

                if result > target {
                    if closest_sum.is_none_or(|c| result < c) {
                        closest_sum = Some(result);
                        closest = extended(&reachable[&number], item);
                    }
                    continue;
                }

                let shorter = reachable
                    .get(&result)
                    .is_none_or(|existing| reachable[&number].len() + 1 < existing.len());
                if shorter {
                    added_something = true;
                    let subset = extended(&reachable[&number], item);
                    reachable.insert(result, subset);
                }
            }
        }
    }

    match reachable.remove(&target) {
        Some(exact) => exact,
        None => closest,
    }
}

/// Like [`subset_closest_to_sum`] in its downward mode, but between two
/// candidate subsets of equal key-sum the one with the smaller `key2`-sum
/// wins. Never returns a sum above `target`.
pub fn subset_closest_to_sum2<'a, T, K, K2>(
    items: &'a [T],
    target: u64,
    key: K,
    key2: K2,
) -> Vec<&'a T>
where
    K: Fn(&T) -> u64,
    K2: Fn(&T) -> f64,
{
    let sum2 = |subset: &[&T]| subset.iter().map(|item| key2(item)).sum::<f64>();

    let mut reachable: BTreeMap<u64, Vec<&T>> = BTreeMap::new();
    reachable.insert(0, Vec::new());

    let mut closest_sum: Option<u64> = None;
    let mut closest: Vec<&T> = Vec::new();
    let mut exact: Vec<&T> = Vec::new();

    for item in items {
        let sums: Vec<u64> = reachable.keys().rev().copied().collect();
        for number in sums {
            let result = key(item) + number;

            if result > target {
                continue;
            }

            let subset = extended(&reachable[&number], item);
            if result == target {
                if exact.is_empty() || sum2(&exact) > sum2(&subset) {
                    exact = subset;
                }
            } else {
                let better = match closest_sum {
                    None => true,
                    Some(c) => c < result || (c == result && sum2(&closest) > sum2(&subset)),
                };
                if better {
                    closest_sum = Some(result);
                    closest = subset.clone();
                }

                let keep = reachable
                    .get(&result)
                    .is_none_or(|existing| sum2(existing) > sum2(&subset));
                if keep {
                    reachable.insert(result, subset);
                }
            }
        }
    }

    if exact.is_empty() {
        closest
    } else {
        exact
    }
}

fn extended<'a, T>(subset: &[&'a T], item: &'a T) -> Vec<&'a T> {
    let mut out = subset.to_vec();
    out.push(item);
    out
}

/// Splits a tick into (hour of day, day index).
pub fn hour_and_day_for_ts(ts: u64) -> (usize, u64) {
    (((ts / 3600) % 24) as usize, ts / (24 * 3600))
}

/// Incremental statistics over a stream of values.
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Coefficient of variation: population standard deviation over mean.
    pub fn cov(&self) -> f64 {
        if self.count == 0 || self.avg() == 0.0 {
            return 0.0;
        }
        let mean = self.avg();
        let variance = (self.sum_sq / self.count as f64) - mean * mean;
        variance.max(0.0).sqrt() / mean
    }
}
