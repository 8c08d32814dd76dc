use crate::config::Options;
use crate::file_tracking::{FileMetadata, OwnedSortedFiles};
use crate::format::{InternalKey, Level, NUM_LEVELS_USIZE, UserKey, IndexLevel as _};
use std::sync::Arc;

/// An immutable per-column-family snapshot of the on-disk file layout. For every level `L >=
/// 1`, `files[L]` is sorted and range-disjoint by smallest key; `files[0]` is kept in
/// insertion (epoch) order since level-0 files may overlap.
#[derive(Debug, Clone, Default)]
pub struct Version {
    files: [OwnedSortedFiles; NUM_LEVELS_USIZE],
}

impl Version {
    #[must_use]
    pub fn new(files: [OwnedSortedFiles; NUM_LEVELS_USIZE]) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn new_empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn level_files(&self, level: Level) -> &OwnedSortedFiles {
        self.files.infallible_index(level)
    }

    #[must_use]
    pub fn files(&self) -> &[OwnedSortedFiles; NUM_LEVELS_USIZE] {
        &self.files
    }

    /// Every file reachable from this version, across all levels.
    pub fn all_files(&self) -> impl Iterator<Item = &Arc<FileMetadata>> {
        self.files.iter().flat_map(|level| level.0.iter())
    }

    /// L0 score is `file_count / trigger`; L1+ score is `level_size / target_size`. Returns
    /// the highest-scoring level whose score is at least 1, i.e. one that needs a size
    /// compaction, along with that score. A size compaction is never triggered on the
    /// maximum-numbered level, since there is nowhere further to push its data.
    #[must_use]
    pub fn compute_compaction_scores(&self, options: &Options) -> Vec<(Level, f64)> {
        let mut scores = Vec::with_capacity(NUM_LEVELS_USIZE - 1);

        for level in Level::all_levels() {
            if level.next().is_none() {
                // A size compaction is never triggered on the maximum-numbered level.
                break;
            }
            let score = if level.inner() == 0 {
                #[expect(clippy::cast_precision_loss, reason = "file counts are small")]
                let count = self.level_files(level).0.len() as f64;
                count / f64::from(options.level0_file_num_compaction_trigger)
            } else {
                #[expect(clippy::cast_precision_loss, reason = "level sizes fit well within f64 precision")]
                let size = self.level_files(level).total_size() as f64;
                size / options.max_bytes_for_level(level.inner())
            };
            scores.push((level, score));
        }

        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores
    }

    /// The read path: find the first file (searching L0 newest-first, then each non-zero
    /// level in turn) whose range could contain `key`, recording a seek against any file that
    /// was searched and found not to contain the key before the eventual hit.
    #[must_use]
    pub fn get(&self, user_key: UserKey<'_>, seek_key: InternalKey<'_>) -> ReadPath {
        let mut seeked_past = Vec::new();

        let mut l0_candidates: Vec<&Arc<FileMetadata>> = self.level_files(Level::ZERO).0.iter()
            .filter(|f| f.smallest_key().user_key <= user_key && user_key <= f.largest_key().user_key)
            .collect();
        l0_candidates.sort_by_key(|f| std::cmp::Reverse(f.epoch_tiebreak_key()));

        for file in l0_candidates {
            seeked_past.push(Arc::clone(file));
        }

        for level in Level::all_levels().into_iter().skip(1) {
            let files = self.level_files(level);
            if let Some(idx) = files.find_file_disjoint(seek_key) {
                let file = &files.0[idx];
                if file.smallest_key().user_key <= user_key {
                    seeked_past.push(Arc::clone(file));
                }
            }
        }

        ReadPath { candidates: seeked_past }
    }
}

/// The ordered sequence of files a read would need to consult, with the first entry being the
/// one most likely to resolve the read. Seek-based compaction scoring charges a seek against
/// every candidate before the one that actually resolves the read (if any).
#[derive(Debug)]
pub struct ReadPath {
    pub candidates: Vec<Arc<FileMetadata>>,
}

#[cfg(test)]
mod tests {
    use crate::file_tracking::{FileMetadata, NewFileMetadata};
    use crate::format::{EntryType, FileNumber, OwnedInternalKey, SequenceNumber};

    use super::*;

    fn file(number: u64, smallest: &[u8], largest: &[u8], size: u64) -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new(
            NewFileMetadata {
                file_number:    FileNumber(number),
                file_size:      size,
                smallest:       OwnedInternalKey::new(InternalKey::new(UserKey(smallest), SequenceNumber(1), EntryType::Value)),
                largest:        OwnedInternalKey::new(InternalKey::new(UserKey(largest), SequenceNumber(1), EntryType::Value)),
                smallest_seqno: SequenceNumber(1),
                largest_seqno:  SequenceNumber(1),
                epoch_number:   number,
                checksum:       None,
                creation_time:  None,
                oldest_ancestor_time: None,
                persist_user_defined_timestamps: false,
            },
            Default::default(),
        ))
    }

    fn version(levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE]) -> Version {
        Version::new(levels.map(OwnedSortedFiles))
    }

    #[test]
    fn empty_version_has_no_compaction_scores_above_zero() {
        let v = Version::new_empty();
        let scores = v.compute_compaction_scores(&Options::default());
        assert!(scores.iter().all(|&(_, score)| score == 0.0));
    }

    #[test]
    fn l0_score_is_file_count_over_trigger() {
        let mut levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE] = std::array::from_fn(|_| Vec::new());
        levels[0] = vec![file(1, b"a", b"b", 1), file(2, b"c", b"d", 1)];
        let options = Options::default();
        let v = version(levels);

        let scores = v.compute_compaction_scores(&options);
        let (_, l0_score) = scores.iter().find(|&&(level, _)| level == Level::ZERO).expect("L0 has a score");
        assert!((l0_score - 2.0 / f64::from(options.level0_file_num_compaction_trigger)).abs() < f64::EPSILON);
    }

    #[test]
    fn highest_score_sorts_first() {
        let mut options = Options::default();
        options.max_bytes_for_level_base = 100;
        options.max_bytes_for_level_multiplier = 10.0;

        let mut levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE] = std::array::from_fn(|_| Vec::new());
        levels[1] = vec![file(1, b"a", b"b", 1000)];
        let v = version(levels);

        let scores = v.compute_compaction_scores(&options);
        assert_eq!(scores[0].0.inner(), 1);
        assert!(scores.windows(2).all(|pair| pair[0].1 >= pair[1].1));
    }

    #[test]
    fn get_finds_l0_candidates_newest_epoch_first() {
        let mut levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE] = std::array::from_fn(|_| Vec::new());
        levels[0] = vec![file(1, b"a", b"m", 1), file(2, b"a", b"m", 1)];
        let v = version(levels);

        let key = UserKey(b"c");
        let seek_key = InternalKey::new(key, SequenceNumber(1), EntryType::Value);
        let path = v.get(key, seek_key);

        assert_eq!(path.candidates.len(), 2);
        assert_eq!(path.candidates[0].file_number(), FileNumber(2), "newer epoch (higher file number) searched first");
    }

    #[test]
    fn get_skips_l1_files_that_do_not_contain_the_key() {
        let mut levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE] = std::array::from_fn(|_| Vec::new());
        levels[1] = vec![file(1, b"a", b"m", 1), file(2, b"n", b"z", 1)];
        let v = version(levels);

        let key = UserKey(b"p");
        let seek_key = InternalKey::new(key, SequenceNumber(1), EntryType::Value);
        let path = v.get(key, seek_key);

        assert_eq!(path.candidates.len(), 1);
        assert_eq!(path.candidates[0].file_number(), FileNumber(2));
    }
}
