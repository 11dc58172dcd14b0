use crate::common::*;

/// The index of a flat box sequence grouped by images.
///
/// Boxes of image `i` occupy the flat range `offsets[i]..offsets[i + 1]`.
/// Box order inside an image is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaggedIndex {
    offsets: Vec<usize>,
}

impl RaggedIndex {
    pub fn from_counts(counts: impl IntoIterator<Item = usize>) -> Self {
        let offsets = iter::once(0)
            .chain(counts.into_iter().scan(0, |total, count| {
                *total += count;
                Some(*total)
            }))
            .collect();
        Self { offsets }
    }

    /// Number of images.
    pub fn num_groups(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of boxes over all images.
    pub fn num_items(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.offsets.windows(2).map(|pair| pair[0]..pair[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_index_from_counts() {
        let index = RaggedIndex::from_counts([3, 0, 2]);
        assert_eq!(index.offsets(), &[0, 3, 3, 5]);
        assert_eq!(index.num_groups(), 3);
        assert_eq!(index.num_items(), 5);

        let ranges: Vec<_> = index.ranges().collect();
        assert_eq!(ranges, vec![0..3, 3..3, 3..5]);
    }

    #[test]
    fn ragged_index_without_groups() {
        let index = RaggedIndex::from_counts(Vec::new());
        assert_eq!(index.num_groups(), 0);
        assert_eq!(index.num_items(), 0);
        assert_eq!(index.ranges().count(), 0);
    }
}
