//! Routing of map output to aggregator buckets.
//!
//! Every key is owned by exactly one bucket, chosen by [`partition_for`]. The hash depends only
//! on the key bytes, so the same key lands in the same bucket whichever mapper emitted it and
//! however many times the job is run.

use std::collections::HashMap;
use std::hash::Hasher;

use crate::combiners::BoundedAcc;

/// Bucket owning `key` among `num_buckets`.
///
/// # Panics
///
/// Panics if `num_buckets` is zero. Configuration validation rules that out.
#[must_use]
pub fn partition_for(key: &str, num_buckets: usize) -> usize {
    assert!(num_buckets > 0, "bucket count must be positive");
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key.as_bytes());
    let hash = hasher.finish() & 0x7fff_ffff;
    // The mask keeps the hash within 31 bits, so it always fits a usize.
    (hash as usize) % num_buckets
}

/// Committed output of one map task.
#[derive(Debug)]
pub enum MapOutput {
    /// Per-key partial sums from the local combiner.
    Combined(HashMap<String, BoundedAcc>),
    /// Raw emissions, in emission order.
    Raw(Vec<(String, i64)>),
}

impl MapOutput {
    /// Number of pairs that will cross the shuffle.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        match self {
            MapOutput::Combined(m) => m.len(),
            MapOutput::Raw(v) => v.len(),
        }
    }
}

/// Everything one aggregator receives.
#[derive(Debug, Default)]
pub struct Bucket {
    pub partials: Vec<(String, BoundedAcc)>,
    pub raw: Vec<(String, i64)>,
}

impl Bucket {
    /// Number of pairs received.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.partials.len() + self.raw.len()
    }
}

/// The full set of buckets for one job run.
#[derive(Debug)]
pub struct ShuffleBuckets {
    buckets: Vec<Bucket>,
}

impl ShuffleBuckets {
    /// `num_buckets` empty buckets.
    ///
    /// # Panics
    ///
    /// Panics if `num_buckets` is zero.
    #[must_use]
    pub fn new(num_buckets: usize) -> Self {
        assert!(num_buckets > 0, "bucket count must be positive");
        Self { buckets: (0..num_buckets).map(|_| Bucket::default()).collect() }
    }

    /// Route one map task's output to the owning buckets.
    pub fn route(&mut self, output: MapOutput) {
        let n = self.buckets.len();
        match output {
            MapOutput::Combined(partials) => {
                for (key, acc) in partials {
                    let idx = partition_for(&key, n);
                    self.buckets[idx].partials.push((key, acc));
                }
            }
            MapOutput::Raw(pairs) => {
                for (key, value) in pairs {
                    let idx = partition_for(&key, n);
                    self.buckets[idx].raw.push((key, value));
                }
            }
        }
    }

    /// Pairs routed so far across all buckets.
    #[must_use]
    pub fn total_pairs(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    #[must_use]
    pub fn into_buckets(self) -> Vec<Bucket> {
        self.buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_in_range() {
        for key in ["foo", "bar", "", "traitor", "ünïcödé"] {
            let first = partition_for(key, 60);
            assert!(first < 60);
            assert_eq!(partition_for(key, 60), first);
        }
        assert_eq!(partition_for("anything", 1), 0);
    }

    #[test]
    fn keys_spread_over_buckets() {
        let used: std::collections::HashSet<usize> =
            (0..1000).map(|i| partition_for(&format!("key-{i}"), 8)).collect();
        assert_eq!(used.len(), 8);
    }

    #[test]
    fn same_key_from_two_mappers_meets_in_one_bucket() {
        let mut shuffle = ShuffleBuckets::new(16);
        shuffle.route(MapOutput::Combined(HashMap::from([(
            "foo".to_string(),
            BoundedAcc::from(5),
        )])));
        shuffle.route(MapOutput::Raw(vec![("foo".to_string(), 7), ("bar".to_string(), 1)]));
        assert_eq!(shuffle.total_pairs(), 3);

        let buckets = shuffle.into_buckets();
        let owner = partition_for("foo", 16);
        assert_eq!(buckets[owner].partials, vec![("foo".to_string(), BoundedAcc::from(5))]);
        assert!(buckets[owner].raw.contains(&("foo".to_string(), 7)));
        let holding_foo = buckets
            .iter()
            .filter(|b| {
                b.partials.iter().any(|(k, _)| k == "foo") || b.raw.iter().any(|(k, _)| k == "foo")
            })
            .count();
        assert_eq!(holding_foo, 1);
    }
}
