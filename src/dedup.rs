//! Counting Bloom filter over log fingerprints: layers an insert counter and
//! periodic full reset on top of a plain Bloom filter ([`bloomfilter::Bloom`]).

use bloomfilter::Bloom;

/// Rolling window of seen items, default size from §6's `dedup max items`.
pub const DEFAULT_MAX_ITEMS: usize = 60_000;
/// Default target false-positive rate from §6.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 1e-8;

pub struct DedupFilter {
    bloom: Bloom<Vec<u8>>,
    max_items: usize,
    false_positive_rate: f64,
    count: usize,
}

impl DedupFilter {
    pub fn new(max_items: usize, false_positive_rate: f64) -> Self {
        Self {
            bloom: Bloom::new_for_fp_rate(max_items, false_positive_rate),
            max_items,
            false_positive_rate,
            count: 0,
        }
    }

    /// Returns `true` if `fingerprint` was (probably) already `add`ed since
    /// the last reset.
    pub fn test(&self, fingerprint: &[u8]) -> bool {
        self.bloom.check(&fingerprint.to_vec())
    }

    /// Records `fingerprint`. Resets the filter first if this insert would
    /// exceed `max_items`, so the window stays bounded.
    pub fn add(&mut self, fingerprint: &[u8]) {
        self.count += 1;
        if self.count > self.max_items {
            self.reset();
            self.count = 1;
        }
        self.bloom.set(&fingerprint.to_vec());
    }

    fn reset(&mut self) {
        self.bloom = Bloom::new_for_fp_rate(self.max_items, self.false_positive_rate);
    }
}

impl Default for DedupFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS, DEFAULT_FALSE_POSITIVE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_fingerprint_tests_negative() {
        let filter = DedupFilter::default();
        assert!(!filter.test(b"never seen"));
    }

    #[test]
    fn seen_fingerprint_tests_positive() {
        let mut filter = DedupFilter::default();
        let fp = b"a-log-fingerprint".to_vec();
        assert!(!filter.test(&fp));
        filter.add(&fp);
        assert!(filter.test(&fp));
    }

    #[test]
    fn exceeding_max_items_resets_the_window() {
        let mut filter = DedupFilter::new(4, 1e-6);
        let fps: Vec<Vec<u8>> = (0..4u32).map(|i| i.to_be_bytes().to_vec()).collect();
        for fp in &fps {
            filter.add(fp);
        }
        assert!(fps.iter().all(|fp| filter.test(fp)));

        // The fifth insert exceeds max_items and triggers a reset before it
        // is itself recorded, so only the fifth item survives.
        let fifth = 99u32.to_be_bytes().to_vec();
        filter.add(&fifth);
        assert!(filter.test(&fifth));
        assert!(!filter.test(&fps[0]));
    }

    proptest::proptest! {
        /// Invariant 4 (§8): test-then-add round trips for any fingerprint,
        /// absent a false positive.
        #[test]
        fn add_then_test_is_always_positive(bytes in proptest::collection::vec(proptest::num::u8::ANY, 0..128)) {
            let mut filter = DedupFilter::default();
            filter.add(&bytes);
            proptest::prop_assert!(filter.test(&bytes));
        }
    }
}
