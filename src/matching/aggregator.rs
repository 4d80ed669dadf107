/// Range-update/point-query structure over the fixed index space `0..n`.
///
/// A range update adds `v` at `i` and subtracts it again at `j` in a Fenwick tree of
/// differences, so the value at any index is the prefix sum up to that index. Both
/// operations run in O(log n).
#[derive(Clone, Debug)]
pub struct RangeAggregator {
    // 1-based Fenwick tree; slot 0 is unused.
    tree: Vec<f64>,
}

impl RangeAggregator {
    pub fn new(n: usize) -> Self {
        Self {
            tree: vec![0.0; n + 1],
        }
    }

    /// Size of the index space.
    pub fn len(&self) -> usize {
        self.tree.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&mut self, mut pos: usize, v: f64) {
        while pos < self.tree.len() {
            self.tree[pos] += v;
            pos += pos & pos.wrapping_neg();
        }
    }

    fn prefix(&self, mut pos: usize) -> f64 {
        let mut sum = 0.0;
        while pos > 0 {
            sum += self.tree[pos];
            pos -= pos & pos.wrapping_neg();
        }
        sum
    }

    /// Adds `v` to every index in `[i, j)`. `j` is clamped to the index space; empty
    /// ranges are ignored.
    pub fn update(&mut self, i: usize, j: usize, v: f64) {
        let j = j.min(self.len());
        if i >= j {
            return;
        }
        self.add(i + 1, v);
        self.add(j + 1, -v);
    }

    /// Returns the accumulated value at index `i`.
    pub fn get(&self, i: usize) -> f64 {
        self.prefix((i + 1).min(self.len()))
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_overlapping_updates_add_up() {
        let mut agg = RangeAggregator::new(10);
        agg.update(0, 5, 1.0);
        agg.update(3, 10, 2.0);
        agg.update(3, 4, 0.5);
        let values: Vec<f64> = (0..10).map(|i| agg.get(i)).collect();
        assert_eq!(
            values,
            vec![1.0, 1.0, 1.0, 3.5, 3.0, 2.0, 2.0, 2.0, 2.0, 2.0]
        );
    }

    #[test]
    fn test_empty_and_clamped_ranges() {
        let mut agg = RangeAggregator::new(4);
        agg.update(2, 2, 7.0);
        agg.update(3, 1, 7.0);
        agg.update(2, 100, 1.0);
        assert_eq!(agg.get(0), 0.0);
        assert_eq!(agg.get(1), 0.0);
        assert_eq!(agg.get(2), 1.0);
        assert_eq!(agg.get(3), 1.0);
        assert!(RangeAggregator::new(0).is_empty());
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..50 {
            let n = rng.gen_range(1..200);
            let mut agg = RangeAggregator::new(n);
            let mut reference = vec![0.0_f64; n];

            for _ in 0..rng.gen_range(0..100) {
                let i = rng.gen_range(0..n);
                let j = rng.gen_range(i..=n);
                // Integer-valued updates keep the float sums exact.
                let v = rng.gen_range(-50..50) as f64;
                agg.update(i, j, v);
                for slot in &mut reference[i..j] {
                    *slot += v;
                }
            }

            for (k, expected) in reference.iter().enumerate() {
                assert_eq!(agg.get(k), *expected, "n = {}, k = {}", n, k);
            }
        }
    }
}
