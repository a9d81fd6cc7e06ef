//! Label filters restricting which vertices a search may return.
//!
//! A [`Filter`] is an immutable bitset over external labels. Search still
//! traverses filtered-out vertices (they keep the graph connected), it only
//! refuses to admit them into the result set. The `inclusion_rate` tells the
//! engine how selective the filter is, which drives the brute-force shortcut
//! for small candidate sets.

/// Immutable set of external labels a search is allowed to return.
#[derive(Debug, Clone)]
pub struct Filter {
    bits: Vec<u64>,
    max_label: u32,
    valid_count: usize,
    max_label_count: usize,
}

impl Filter {
    /// Build a filter from the allowed labels.
    ///
    /// `max_label_count` is the total number of labels in the dataset and
    /// only affects [`inclusion_rate`](Self::inclusion_rate). Duplicate
    /// labels are counted once.
    #[must_use]
    pub fn new(valid_labels: &[u32], max_label_count: usize) -> Self {
        let max_label = valid_labels.iter().copied().max().unwrap_or(0);
        let words = (max_label as usize + 64) / 64;
        let mut bits = vec![0u64; words];
        let mut valid_count = 0usize;
        for &label in valid_labels {
            let word = &mut bits[label as usize / 64];
            let mask = 1u64 << (label % 64);
            if *word & mask == 0 {
                *word |= mask;
                valid_count += 1;
            }
        }
        Self {
            bits,
            max_label,
            valid_count,
            max_label_count: max_label_count.max(valid_count),
        }
    }

    /// Whether a label may appear in search results.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, label: u32) -> bool {
        label <= self.max_label && self.bits[label as usize / 64] >> (label % 64) & 1 == 1
    }

    /// Number of distinct allowed labels.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.valid_count
    }

    /// Fraction of the dataset's labels this filter admits.
    #[inline]
    #[must_use]
    pub fn inclusion_rate(&self) -> f32 {
        self.valid_count as f32 / self.max_label_count as f32
    }

    /// Visit every allowed label in ascending order.
    pub fn for_each_valid_label(&self, mut f: impl FnMut(u32)) {
        for (word_index, &word) in self.bits.iter().enumerate() {
            let mut word = word;
            while word != 0 {
                let bit = word.trailing_zeros();
                f(word_index as u32 * 64 + bit);
                word &= word - 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_and_counts() {
        let filter = Filter::new(&[3, 7, 7, 64, 129], 1000);
        assert!(filter.is_valid(3));
        assert!(filter.is_valid(64));
        assert!(filter.is_valid(129));
        assert!(!filter.is_valid(4));
        assert!(!filter.is_valid(5000));
        assert_eq!(filter.size(), 4);
        assert!((filter.inclusion_rate() - 0.004).abs() < 1e-6);
    }

    #[test]
    fn iterates_labels_in_order() {
        let filter = Filter::new(&[129, 3, 64], 200);
        let mut seen = Vec::new();
        filter.for_each_valid_label(|l| seen.push(l));
        assert_eq!(seen, vec![3, 64, 129]);
    }

    #[test]
    fn empty_filter_admits_nothing() {
        let filter = Filter::new(&[], 10);
        assert_eq!(filter.size(), 0);
        assert!(!filter.is_valid(0));
    }
}
