//! Combiners used by the local (mapper-side) combine step and by the aggregators.
//!
//! A [`CombineFn`] splits aggregation into an accumulator lifecycle:
//! `create` → `add_input`* → `merge`* → `finish`. The same combiner runs in both places:
//! mapper workers fold their own emissions into accumulators, aggregator workers merge the
//! accumulators that arrive from every mapper, and only the aggregator calls `finish`.
//!
//! [`BoundedSum`] is the only combiner the job needs. Its accumulator is 128 bits wide so
//! partial sums are exact; the clamp to the `i64` range happens once, in `finish`. That keeps
//! the result independent of how values were split across combiners.
//!
//! ```
//! use traitor::combiners::{BoundedSum, BoundedValue, CombineFn, OverflowPolicy};
//!
//! let sum = BoundedSum::new(OverflowPolicy::Saturate);
//! let mut left = sum.create();
//! sum.add_input(&mut left, i64::MAX);
//! sum.add_input(&mut left, 1);
//! let mut right = sum.create();
//! sum.add_input(&mut right, -1);
//! sum.merge(&mut left, right);
//! assert_eq!(sum.finish(left), BoundedValue::Exact(i64::MAX));
//! ```

use serde::{Deserialize, Serialize};

/// Accumulator lifecycle for per-key aggregation.
///
/// - `V`: input value type
/// - `A`: accumulator type (what crosses the shuffle)
/// - `O`: final output type
pub trait CombineFn<V, A, O>: Send + Sync + 'static {
    fn create(&self) -> A;
    fn add_input(&self, acc: &mut A, v: V);
    fn merge(&self, acc: &mut A, other: A);
    fn finish(&self, acc: A) -> O;
}

/// Combiners that can build an accumulator straight from a whole group of values.
///
/// Used on the aggregator side when no mapper-side combining happened and a key's raw values
/// arrive as one group.
pub trait LiftableCombiner<V, A, O>: CombineFn<V, A, O> {
    fn build_from_group(&self, values: &[V]) -> A;
}

/// How a key whose exact total does not fit in an `i64` is handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Clamp to `i64::MAX` / `i64::MIN`.
    #[default]
    Saturate,
    /// Log the key and leave it out of the output.
    Drop,
    /// Abort the job.
    Fail,
}

/// Exact running total of `i64` values.
///
/// Saturating 128-bit addition cannot saturate before 2^64 inputs have been added, so for
/// any realistic job this is the exact sum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedAcc(i128);

impl BoundedAcc {
    /// The exact total so far.
    #[inline]
    #[must_use]
    pub fn total(self) -> i128 {
        self.0
    }

    /// Whether the total is representable as an `i64`.
    #[inline]
    #[must_use]
    pub fn fits(self) -> bool {
        i64::try_from(self.0).is_ok()
    }

    #[inline]
    fn add(&mut self, v: i128) {
        self.0 = self.0.saturating_add(v);
    }
}

impl From<i64> for BoundedAcc {
    fn from(v: i64) -> Self {
        Self(i128::from(v))
    }
}

/// Result of finishing a bounded sum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundedValue {
    /// The exact total.
    Exact(i64),
    /// The total overflowed and was clamped.
    Saturated(i64),
    /// The total overflowed and the key is to be dropped.
    Dropped,
    /// The total overflowed and the job must fail.
    Overflowed,
}

impl BoundedValue {
    /// The value to write, if the key is written at all.
    #[must_use]
    pub fn value(self) -> Option<i64> {
        match self {
            BoundedValue::Exact(v) | BoundedValue::Saturated(v) => Some(v),
            BoundedValue::Dropped | BoundedValue::Overflowed => None,
        }
    }
}

/// Clamp an exact total into the `i64` range.
#[inline]
#[must_use]
pub fn bound(total: i128) -> i64 {
    i64::try_from(total).unwrap_or(if total > 0 { i64::MAX } else { i64::MIN })
}

/// Overflow-safe sum of `i64` values per key.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoundedSum {
    policy: OverflowPolicy,
}

impl BoundedSum {
    #[must_use]
    pub fn new(policy: OverflowPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

impl CombineFn<i64, BoundedAcc, BoundedValue> for BoundedSum {
    fn create(&self) -> BoundedAcc {
        BoundedAcc::default()
    }

    fn add_input(&self, acc: &mut BoundedAcc, v: i64) {
        acc.add(i128::from(v));
    }

    fn merge(&self, acc: &mut BoundedAcc, other: BoundedAcc) {
        acc.add(other.0);
    }

    fn finish(&self, acc: BoundedAcc) -> BoundedValue {
        if let Ok(v) = i64::try_from(acc.0) {
            return BoundedValue::Exact(v);
        }
        match self.policy {
            OverflowPolicy::Saturate => BoundedValue::Saturated(bound(acc.0)),
            OverflowPolicy::Drop => BoundedValue::Dropped,
            OverflowPolicy::Fail => BoundedValue::Overflowed,
        }
    }
}

impl LiftableCombiner<i64, BoundedAcc, BoundedValue> for BoundedSum {
    fn build_from_group(&self, values: &[i64]) -> BoundedAcc {
        let mut acc = BoundedAcc::default();
        for v in values {
            acc.add(i128::from(*v));
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_all(values: &[i64]) -> BoundedValue {
        let c = BoundedSum::default();
        c.finish(c.build_from_group(values))
    }

    #[test]
    fn representable_sums_are_exact() {
        assert_eq!(sum_all(&[5, 7]), BoundedValue::Exact(12));
        assert_eq!(sum_all(&[i64::MAX, -1, 1]), BoundedValue::Exact(i64::MAX));
        assert_eq!(sum_all(&[]), BoundedValue::Exact(0));
    }

    #[test]
    fn overflow_saturates_at_the_right_end() {
        assert_eq!(sum_all(&[i64::MAX, 1]), BoundedValue::Saturated(i64::MAX));
        assert_eq!(sum_all(&[i64::MIN, -1]), BoundedValue::Saturated(i64::MIN));
        assert_eq!(
            sum_all(&[i64::MAX, i64::MAX, i64::MAX]),
            BoundedValue::Saturated(i64::MAX)
        );
    }

    #[test]
    fn policy_decides_what_overflow_becomes() {
        let values = [i64::MAX, 10];
        let drop = BoundedSum::new(OverflowPolicy::Drop);
        assert_eq!(drop.finish(drop.build_from_group(&values)), BoundedValue::Dropped);
        let fail = BoundedSum::new(OverflowPolicy::Fail);
        assert_eq!(fail.finish(fail.build_from_group(&values)), BoundedValue::Overflowed);
        assert_eq!(fail.finish(fail.build_from_group(&[1, 2])), BoundedValue::Exact(3));
    }

    #[test]
    fn partial_accumulators_merge_to_the_direct_result() {
        let values = [i64::MAX, 3, i64::MIN, -9, i64::MAX, i64::MAX, -5, i64::MIN];
        let c = BoundedSum::default();
        let direct = c.finish(c.build_from_group(&values));

        for split in 0..=values.len() {
            let (a, b) = values.split_at(split);
            let mut acc = c.build_from_group(a);
            c.merge(&mut acc, c.build_from_group(b));
            assert_eq!(c.finish(acc), direct, "split at {split}");
        }

        // One accumulator per value, merged in reverse order.
        let mut acc = c.create();
        for v in values.iter().rev() {
            c.merge(&mut acc, BoundedAcc::from(*v));
        }
        assert_eq!(c.finish(acc), direct);
    }

    #[test]
    fn bound_clamps_both_directions() {
        assert_eq!(bound(i128::from(i64::MAX) + 1), i64::MAX);
        assert_eq!(bound(i128::from(i64::MIN) - 1), i64::MIN);
        assert_eq!(bound(42), 42);
    }
}
