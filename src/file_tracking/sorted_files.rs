use std::collections::HashSet;
use std::sync::Arc;

use crate::format::{FileNumber, InternalKey, UserKey};
use super::FileMetadata;

/// The files of one level, owned. For level 0 these are kept in insertion (epoch) order; for
/// level 1 and up they are sorted and range-disjoint by smallest key.
#[derive(Debug, Clone, Default)]
pub struct OwnedSortedFiles(pub(crate) Vec<Arc<FileMetadata>>);

/// A borrowed view of one level's files, used by code that only needs to read the level.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SortedFiles<'a>(pub(crate) &'a [Arc<FileMetadata>]);

impl OwnedSortedFiles {
    /// The files of this level, in the order described on the type.
    #[must_use]
    pub fn files(&self) -> &[Arc<FileMetadata>] {
        &self.0
    }

    #[must_use]
    pub(crate) fn as_sorted_files(&self) -> SortedFiles<'_> {
        SortedFiles(&self.0)
    }

    #[must_use]
    pub(crate) fn total_size(&self) -> u64 {
        self.0.iter().map(|f| f.file_size()).sum()
    }

    /// Merge a sorted `base` level with an unsorted `added` set, dropping anything named in
    /// `deleted`. For `is_level_zero`, the result preserves relative insertion order (deletes
    /// in place, then appends `added` in epoch order); otherwise the merged set is re-sorted
    /// by `(smallest key, file number)`.
    #[must_use]
    pub(crate) fn merge(
        base:           SortedFiles<'_>,
        added:          &mut [Arc<FileMetadata>],
        deleted:        &HashSet<FileNumber>,
        is_level_zero:  bool,
    ) -> Self {
        let mut files: Vec<Arc<FileMetadata>> = base.0.iter()
            .filter(|f| !deleted.contains(&f.file_number()))
            .cloned()
            .collect();

        files.extend(
            added.iter()
                .filter(|f| !deleted.contains(&f.file_number()))
                .cloned(),
        );

        if is_level_zero {
            files.sort_by_key(|f| f.epoch_tiebreak_key());
        } else {
            files.sort_by(|a, b| {
                a.smallest_key().cmp(&b.smallest_key()).then_with(|| a.file_number().cmp(&b.file_number()))
            });
        }

        Self(files)
    }

    /// Binary search for the earliest file (by position) whose largest key is `>= target`.
    /// Only valid for a disjoint, sorted (L1+) level.
    #[must_use]
    pub(crate) fn find_file_disjoint(&self, target: InternalKey<'_>) -> Option<usize> {
        self.as_sorted_files().find_file_disjoint(target)
    }
}

impl SortedFiles<'_> {
    #[must_use]
    pub(crate) fn find_file_disjoint(&self, target: InternalKey<'_>) -> Option<usize> {
        let idx = self.0.partition_point(|f| f.largest_key() < target);
        (idx < self.0.len()).then_some(idx)
    }

    /// Does `[lower, upper]` (either bound optionally open) overlap this disjoint, sorted
    /// level? Used to find the output-level inputs for a compaction.
    #[must_use]
    pub(crate) fn range_overlaps_disjoint(
        &self,
        lower: Option<UserKey<'_>>,
        upper: Option<UserKey<'_>>,
    ) -> (usize, usize) {
        let start = match lower {
            Some(lower) => self.0.partition_point(|f| f.largest_key().user_key < lower),
            None => 0,
        };
        let end = match upper {
            Some(upper) => self.0.partition_point(|f| f.smallest_key().user_key <= upper),
            None => self.0.len(),
        };
        (start, end.max(start))
    }

    /// Non-disjoint linear overlap check, for level 0 where files may overlap each other.
    #[must_use]
    pub(crate) fn overlaps_range(
        &self,
        lower: Option<UserKey<'_>>,
        upper: Option<UserKey<'_>>,
    ) -> Vec<usize> {
        self.0.iter().enumerate()
            .filter(|(_, f)| {
                let below = upper.is_some_and(|upper| f.smallest_key().user_key > upper);
                let above = lower.is_some_and(|lower| f.largest_key().user_key < lower);
                !below && !above
            })
            .map(|(i, _)| i)
            .collect()
    }
}
