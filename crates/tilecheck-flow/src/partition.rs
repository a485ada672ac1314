//! Work partitioning into fixed-size pages.

use serde::{Deserialize, Serialize};

/// One page of the catalog to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// Zero-based page index.
    pub page_index: usize,
    /// Number of collections on this page.
    pub page_size: usize,
    /// Items per full page; catalog pages are addressed in these units.
    pub stride: usize,
}

impl PageDescriptor {
    /// Returns the 1-indexed catalog page number.
    #[must_use]
    pub const fn page_num(&self) -> u64 {
        self.page_index as u64 + 1
    }

    /// Returns the zero-based position of the page's first collection.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.page_index * self.stride
    }
}

/// Splits `total_count` items into pages of `page_size`.
///
/// Returns `ceil(total_count / page_size)` pages; every page is full except
/// possibly the last, which carries the remainder. A zero total or zero page
/// size yields no pages.
#[must_use]
pub fn plan(total_count: usize, page_size: usize) -> Vec<PageDescriptor> {
    if total_count == 0 || page_size == 0 {
        return Vec::new();
    }
    (0..total_count.div_ceil(page_size))
        .map(|page_index| PageDescriptor {
            page_index,
            page_size: page_size.min(total_count - page_index * page_size),
            stride: page_size,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn remainder_lands_on_last_page() {
        let sizes: Vec<_> = plan(257, 100).iter().map(|p| p.page_size).collect();
        assert_eq!(sizes, vec![100, 100, 57]);
    }

    #[test]
    fn empty_plans() {
        assert!(plan(0, 100).is_empty());
        assert!(plan(10, 0).is_empty());
    }

    #[test]
    fn exact_multiple_has_no_short_page() {
        let pages = plan(200, 100);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].page_size, 100);
        assert_eq!(pages[1].page_num(), 2);
        assert_eq!(pages[1].offset(), 100);
    }

    proptest! {
        #[test]
        fn pages_cover_total_exactly(total in 0usize..10_000, size in 1usize..500) {
            let pages = plan(total, size);
            prop_assert_eq!(pages.iter().map(|p| p.page_size).sum::<usize>(), total);
            prop_assert_eq!(pages.len(), total.div_ceil(size));
            for (i, page) in pages.iter().enumerate() {
                prop_assert_eq!(page.page_index, i);
                prop_assert!(page.page_size >= 1 && page.page_size <= size);
            }
        }
    }
}
