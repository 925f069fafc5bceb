//! Per-field merge rules.
//!
//! An entity folds every incoming observation for the same id into the
//! value it already holds. Each field picks one rule; `#[derive(Merge)]`
//! wires the rules from `#[merge(...)]` attributes, hand-written impls call
//! the helpers below directly.
//!
//! `sum`, `union`, `max` and `min` are associative and commutative, so
//! repeated partial merges converge whatever the arrival order. `overwrite`
//! and `coalesce` are order-sensitive and rely on in-order delivery.

/// In-place `merge(existing, incoming)`.
pub trait Merge {
    /// Fold `incoming` into `self`.
    fn merge(&mut self, incoming: Self);
}

/// Returns `merge(existing, incoming)` by value.
pub fn merged<T: Merge>(mut existing: T, incoming: T) -> T {
    existing.merge(incoming);
    existing
}

/// Incoming wins.
pub fn overwrite<T>(existing: &mut T, incoming: T) {
    *existing = incoming;
}

/// Incoming wins only when it carries a value.
pub fn coalesce<T>(existing: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *existing = incoming;
    }
}

/// Keeps the larger value.
pub fn max<T: PartialOrd>(existing: &mut T, incoming: T) {
    if incoming > *existing {
        *existing = incoming;
    }
}

/// Keeps the smaller value.
pub fn min<T: PartialOrd>(existing: &mut T, incoming: T) {
    if incoming < *existing {
        *existing = incoming;
    }
}

/// Integer counter folded by [`sum`].
pub trait Counter: Copy {
    /// Addition clamped at the type's bounds.
    fn add_clamped(self, other: Self) -> Self;
}

macro_rules! impl_counter {
    ($($t:ty),*) => {
        $(impl Counter for $t {
            fn add_clamped(self, other: Self) -> Self {
                self.saturating_add(other)
            }
        })*
    };
}

impl_counter!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// Adds counters, saturating instead of overflowing.
pub fn sum<T: Counter>(existing: &mut T, incoming: T) {
    *existing = existing.add_clamped(incoming);
}

/// Set union for collection-valued fields.
pub fn union<C, I>(existing: &mut C, incoming: C)
where
    C: Extend<I> + IntoIterator<Item = I>,
{
    existing.extend(incoming);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Edge {
        label: String,
        hits: u64,
        last_seen: i64,
        peers: BTreeSet<u32>,
    }

    impl Merge for Edge {
        fn merge(&mut self, incoming: Self) {
            overwrite(&mut self.label, incoming.label);
            sum(&mut self.hits, incoming.hits);
            max(&mut self.last_seen, incoming.last_seen);
            union(&mut self.peers, incoming.peers);
        }
    }

    fn edge(label: &str, hits: u64, last_seen: i64, peers: &[u32]) -> Edge {
        Edge {
            label: label.to_string(),
            hits,
            last_seen,
            peers: peers.iter().copied().collect(),
        }
    }

    #[test]
    fn commutative_fields_converge_in_any_order() {
        let a = edge("a", 1, 10, &[1]);
        let b = edge("b", 2, 30, &[2]);
        let c = edge("c", 4, 20, &[1, 3]);

        let left = merged(merged(a.clone(), b.clone()), c.clone());
        let right = merged(merged(a, c.clone()), b);

        assert_eq!(left.hits, right.hits);
        assert_eq!(left.last_seen, right.last_seen);
        assert_eq!(left.peers, right.peers);
        assert_eq!(left.hits, 7);
        assert_eq!(left.last_seen, 30);
        assert_eq!(left.peers, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn overwrite_follows_arrival_order() {
        let mut value = edge("first", 0, 0, &[]);
        value.merge(edge("second", 0, 0, &[]));
        value.merge(edge("third", 0, 0, &[]));
        assert_eq!(value.label, "third");
    }

    #[test]
    fn coalesce_ignores_absent_values() {
        let mut os = Some("linux".to_string());
        coalesce(&mut os, None);
        assert_eq!(os.as_deref(), Some("linux"));
        coalesce(&mut os, Some("windows".to_string()));
        assert_eq!(os.as_deref(), Some("windows"));
    }

    #[test]
    fn sum_saturates() {
        let mut calls = u64::MAX - 1;
        sum(&mut calls, 5);
        assert_eq!(calls, u64::MAX);

        let mut delta = i32::MIN + 1;
        sum(&mut delta, -10);
        assert_eq!(delta, i32::MIN);
    }

    #[test]
    fn min_keeps_smallest() {
        let mut v = 5;
        min(&mut v, 9);
        min(&mut v, 3);
        assert_eq!(v, 3);
    }
}
