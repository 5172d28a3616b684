//! Optimum/remainder arithmetic and over-/under-load separation.
//!
//! These are the two primitives the group- and cluster-level balancers
//! build on: `compute_optimum` answers "what's a balanced load per bucket",
//! `separate_groups` answers "which buckets are currently unbalanced".

/// Splits `total` evenly across `bucket_count` buckets.
///
/// Returns `(quotient, remainder)` such that `total == bucket_count *
/// quotient + remainder` and `0 <= remainder < bucket_count`. A balanced
/// bucket carries either `quotient` or `quotient + 1` units.
///
/// `bucket_count` must be non-zero; this mirrors the unchecked integer
/// division the planner is distilled from and is a programmer error to
/// trigger, not a recoverable condition a caller is expected to handle.
pub fn compute_optimum(bucket_count: usize, total: usize) -> (usize, usize) {
    assert!(bucket_count > 0, "compute_optimum: bucket_count must be non-zero");
    (total / bucket_count, total % bucket_count)
}

/// Separates `items` into over-loaded and under-loaded subsets relative to
/// the optimum load for `total` spread across `items.len()` buckets.
///
/// - `over`: items whose load exceeds `quotient + 1`, plus items at exactly
///   `quotient + 1` beyond the first `remainder` of them (items are
///   considered in descending-load order, tie-broken by `key_fn` ascending;
///   the first `remainder` items at `quotient + 1` are balanced, not over).
/// - `under`: items whose load is strictly less than `quotient`.
///
/// Items at `quotient` are always balanced; items at `quotient + 1` within
/// the allowed `remainder` count are also balanced. Balanced items appear
/// in neither returned set.
pub fn separate_groups<T, K, L, F>(items: &[T], load_fn: L, total: usize, key_fn: F) -> (Vec<T>, Vec<T>)
where
    T: Clone,
    K: Ord,
    L: Fn(&T) -> usize,
    F: Fn(&T) -> K,
{
    if items.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let (quotient, remainder) = compute_optimum(items.len(), total);

    let mut ordered: Vec<&T> = items.iter().collect();
    ordered.sort_by(|a, b| load_fn(b).cmp(&load_fn(a)).then_with(|| key_fn(a).cmp(&key_fn(b))));

    let mut over = Vec::new();
    let mut allowed_at_quotient_plus_one = remainder;
    for item in ordered {
        let load = load_fn(item);
        if load > quotient + 1 {
            over.push(item.clone());
        } else if load == quotient + 1 {
            if allowed_at_quotient_plus_one > 0 {
                allowed_at_quotient_plus_one -= 1;
            } else {
                over.push(item.clone());
            }
        }
    }

    let under = items.iter().filter(|item| load_fn(item) < quotient).cloned().collect();

    (over, under)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_optimum_splits_evenly() {
        assert_eq!(compute_optimum(3, 9), (3, 0));
        assert_eq!(compute_optimum(3, 10), (3, 1));
        assert_eq!(compute_optimum(4, 2), (0, 2));
    }

    #[test]
    #[should_panic(expected = "bucket_count must be non-zero")]
    fn compute_optimum_panics_on_zero_buckets() {
        compute_optimum(0, 5);
    }

    #[test]
    fn separate_groups_respects_remainder_allowance() {
        // 5 items, total 15 -> quotient 3, remainder 0. Items exactly at
        // quotient are balanced; only the item above quotient+1 is over.
        let loads = vec![("a", 5usize), ("b", 3), ("c", 3), ("d", 3), ("e", 1)];
        let (over, under) = separate_groups(&loads, |(_, l)| *l, 15, |(k, _)| *k);
        assert_eq!(over.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(under.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec!["e"]);
    }

    #[test]
    fn separate_groups_allows_remainder_many_at_quotient_plus_one() {
        // total=10 over 4 items -> quotient 2, remainder 2. Two items at 3
        // are balanced; a third at 3 would be over; items under 2 are under.
        let loads = vec![("a", 3usize), ("b", 3), ("c", 3), ("d", 1)];
        let (over, under) = separate_groups(&loads, |(_, l)| *l, 10, |(k, _)| *k);
        // "a" and "b" consume the remainder allowance at quotient+1 first
        // (ascending key order among ties); "c" is the one beyond it.
        assert_eq!(over.len(), 1);
        assert_eq!(over[0].0, "c");
        assert_eq!(under.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec!["d"]);
    }

    #[test]
    fn separate_groups_empty_input() {
        let loads: Vec<(&str, usize)> = Vec::new();
        let (over, under) = separate_groups(&loads, |(_, l)| *l, 0, |(k, _)| *k);
        assert!(over.is_empty());
        assert!(under.is_empty());
    }
}
