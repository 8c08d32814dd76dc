//! Leveled compaction selection (§4.5): given a version's per-level scores, choose the next
//! compaction to run. Grounded on the scoring and clean-cut-expansion shape of RocksDB's level
//! compaction picker; L0 is handled separately from L1+ since its files may overlap.

use std::sync::Arc;

use crate::compaction::OptionalCompactionPointer;
use crate::config::{
    Options, EXPANDED_COMPACTION_SIZE_FACTOR, GRANDPARENT_OVERLAP_SIZE_FACTOR,
    INTRA_L0_EXTRA_FILES, MIN_FILES_FOR_INTRA_L0_COMPACTION,
};
use crate::file_tracking::FileMetadata;
use crate::format::{IndexLevel as _, Level, NUM_LEVELS_USIZE, UserKey};
use crate::version::Version;

/// One side (input level or output level) of a picked compaction.
#[derive(Debug)]
pub struct CompactionInput {
    pub level: Level,
    pub files: Vec<Arc<FileMetadata>>,
}

impl CompactionInput {
    fn key_range(&self) -> Option<(UserKey<'_>, UserKey<'_>)> {
        let mut iter = self.files.iter();
        let first = iter.next()?;
        let mut smallest = first.smallest_key().user_key;
        let mut largest = first.largest_key().user_key;
        for file in iter {
            if file.smallest_key().user_key < smallest {
                smallest = file.smallest_key().user_key;
            }
            if file.largest_key().user_key > largest {
                largest = file.largest_key().user_key;
            }
        }
        Some((smallest, largest))
    }
}

/// A fully selected compaction, ready for the caller to register (mark inputs
/// being-compacted) and execute. Execution itself -- reading table files and writing new ones
/// -- is an external collaborator's responsibility.
#[derive(Debug)]
pub struct PickedCompaction {
    pub input:                CompactionInput,
    pub output:                CompactionInput,
    pub output_level:          Level,
    /// Files at `output_level.next()` overlapping the compaction's output key range, tracked
    /// so the writer can split output files before grandparent overlap grows past
    /// `GRANDPARENT_OVERLAP_SIZE_FACTOR * target_file_size`.
    pub grandparents:          Vec<Arc<FileMetadata>>,
    /// A move-only compaction: the single input file does not overlap anything in the output
    /// level, so it can be relinked into place with a `VersionEdit` and no rewrite.
    pub is_trivial_move:       bool,
    pub max_output_file_size:  u64,
}

impl PickedCompaction {
    pub fn all_input_files(&self) -> impl Iterator<Item = &Arc<FileMetadata>> {
        self.input.files.iter().chain(self.output.files.iter())
    }

    /// Marks every input file as being-compacted, so a later picker call skips them.
    pub fn mark_inputs_in_progress(&self) {
        for file in self.all_input_files() {
            file.set_being_compacted(true);
        }
    }

    /// Clears the being-compacted flag on every input file, for a compaction that was
    /// cancelled or failed before installing its output.
    pub fn clear_inputs_in_progress(&self) {
        for file in self.all_input_files() {
            file.set_being_compacted(false);
        }
    }
}

#[derive(Default)]
pub struct LevelCompactionPicker;

impl LevelCompactionPicker {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Picks the next compaction, trying levels in descending score order and falling through
    /// to the next-best level when the top candidate's files are all already being compacted
    /// (e.g. its output level already has a conflicting compaction in flight).
    #[must_use]
    pub fn pick(
        &self,
        version:                      &Version,
        options:                      &Options,
        compaction_pointers:          &[OptionalCompactionPointer; NUM_LEVELS_USIZE],
        level0_compaction_in_progress: bool,
    ) -> Option<PickedCompaction> {
        let scores = version.compute_compaction_scores(options);

        for (level, score) in scores {
            if score < 1.0 {
                break;
            }

            let picked = if level.inner() == 0 {
                if level0_compaction_in_progress {
                    None
                } else {
                    self.pick_level0(version, options)
                }
            } else {
                self.pick_level(version, options, level, compaction_pointers)
            };

            if picked.is_some() {
                return picked;
            }
        }

        None
    }

    fn pick_level0(&self, version: &Version, options: &Options) -> Option<PickedCompaction> {
        let l0 = version.level_files(Level::ZERO).as_sorted_files();
        let live: Vec<Arc<FileMetadata>> = l0.0.iter().filter(|f| !f.is_being_compacted()).cloned().collect();
        if live.is_empty() {
            return None;
        }

        if let Some(picked) = self.pick_level0_to_base(version, options, &live) {
            return Some(picked);
        }
        self.pick_intra_l0(options, &live)
    }

    /// The ordinary L0 compaction: every live L0 file (they may overlap arbitrarily, so none
    /// can be safely left behind) plus whatever in level 1 they overlap.
    fn pick_level0_to_base(
        &self,
        version: &Version,
        options: &Options,
        live_l0: &[Arc<FileMetadata>],
    ) -> Option<PickedCompaction> {
        let output_level = Level::ZERO.next().expect("NUM_LEVELS > 1");
        let input = CompactionInput { level: Level::ZERO, files: live_l0.to_vec() };
        let (smallest, largest) = input.key_range()?;

        let base = version.level_files(output_level).as_sorted_files();
        let (start, end) = base.range_overlaps_disjoint(Some(smallest), Some(largest));
        if base.0[start..end].iter().any(|f| f.is_being_compacted()) {
            return None;
        }
        let output = CompactionInput { level: output_level, files: base.0[start..end].to_vec() };

        let grandparents = grandparents_overlapping(version, output_level, &input, &output);
        Some(PickedCompaction {
            input,
            output,
            output_level,
            grandparents,
            is_trivial_move: false,
            max_output_file_size: options.target_file_size(output_level.inner()),
        })
    }

    /// Compacts a run of the oldest L0 files together, without touching level 1, purely to
    /// bring the L0 file count back down. Only attempted once L0 has accumulated well past its
    /// normal trigger, since it does no useful work towards draining L0 into the rest of the
    /// tree.
    fn pick_intra_l0(&self, options: &Options, live_l0: &[Arc<FileMetadata>]) -> Option<PickedCompaction> {
        let trigger = options.level0_file_num_compaction_trigger;
        #[expect(clippy::cast_possible_truncation, reason = "file counts are small")]
        if (live_l0.len() as u32) < trigger + INTRA_L0_EXTRA_FILES {
            return None;
        }
        if live_l0.len() < MIN_FILES_FOR_INTRA_L0_COMPACTION {
            return None;
        }

        let mut by_age = live_l0.to_vec();
        by_age.sort_by_key(|f| f.epoch_tiebreak_key());

        let limit = options.max_compaction_bytes;
        let mut selected = Vec::new();
        let mut total = 0_u64;
        for file in &by_age {
            let next_total = total + file.file_size();
            if !selected.is_empty() && next_total > limit {
                break;
            }
            selected.push(Arc::clone(file));
            total = next_total;
        }
        if selected.len() < MIN_FILES_FOR_INTRA_L0_COMPACTION {
            return None;
        }

        let input = CompactionInput { level: Level::ZERO, files: selected };
        Some(PickedCompaction {
            input,
            output: CompactionInput { level: Level::ZERO, files: Vec::new() },
            output_level: Level::ZERO,
            grandparents: Vec::new(),
            is_trivial_move: false,
            max_output_file_size: options.target_file_size(0),
        })
    }

    /// Picks one compaction from `level >= 1` into `level.next()`. The starting file resumes
    /// after the level's compaction pointer (round-robin across repeated picks), wrapping back
    /// to the smallest key once the pointer runs off the end.
    fn pick_level(
        &self,
        version:             &Version,
        options:             &Options,
        level:               Level,
        compaction_pointers: &[OptionalCompactionPointer; NUM_LEVELS_USIZE],
    ) -> Option<PickedCompaction> {
        let output_level = level.next()?;
        let files = version.level_files(level).as_sorted_files();

        let start_idx = compaction_pointers.infallible_index(level).internal_key()
            .and_then(|pointer| files.0.iter().position(|f| f.largest_key() > pointer))
            .unwrap_or(0);

        let start = (start_idx..files.0.len()).chain(0..start_idx)
            .find(|&i| !files.0[i].is_being_compacted())?;

        let mut input_files = vec![Arc::clone(&files.0[start])];
        let mut output_files;
        loop {
            let current_input = CompactionInput { level, files: input_files.clone() };
            let (smallest, largest) = current_input.key_range().expect("at least one file selected");

            let base = version.level_files(output_level).as_sorted_files();
            let (out_start, out_end) = base.range_overlaps_disjoint(Some(smallest), Some(largest));
            if base.0[out_start..out_end].iter().any(|f| f.is_being_compacted()) {
                return None;
            }
            output_files = base.0[out_start..out_end].to_vec();

            let combined = CompactionInput {
                level,
                files: input_files.iter().cloned()
                    .chain(output_files.iter().cloned())
                    .collect(),
            };
            let expanded_range = combined.key_range().expect("non-empty");

            let grown_start = files.0.iter().position(|f| !f.is_being_compacted()
                && f.largest_key().user_key >= expanded_range.0)
                .unwrap_or(start);
            let grown_end = files.0.iter().rposition(|f| !f.is_being_compacted()
                && f.smallest_key().user_key <= expanded_range.1)
                .map_or(start, |i| i + 1);

            let grown: Vec<Arc<FileMetadata>> = if grown_start < grown_end {
                files.0[grown_start..grown_end].to_vec()
            } else {
                input_files.clone()
            };

            let limit = options.max_bytes_for_level_base.max(options.target_file_size(level.inner()))
                * EXPANDED_COMPACTION_SIZE_FACTOR;
            let grown_size: u64 = grown.iter().map(|f| f.file_size()).sum();

            if grown.len() > input_files.len() && grown_size <= limit
                && grown.iter().all(|f| !f.is_being_compacted())
            {
                input_files = grown;
                continue;
            }
            break;
        }

        let input = CompactionInput { level, files: input_files };
        let is_trivial_move = output_files.is_empty() && input.files.len() == 1;
        let output = CompactionInput { level: output_level, files: std::mem::take(&mut output_files) };

        let grandparents = grandparents_overlapping(version, output_level, &input, &output);
        let trivial_move_ok = is_trivial_move && grandparent_overlap_size(&grandparents)
            <= GRANDPARENT_OVERLAP_SIZE_FACTOR * options.target_file_size(output_level.inner());

        Some(PickedCompaction {
            input,
            output,
            output_level,
            grandparents,
            is_trivial_move: trivial_move_ok,
            max_output_file_size: options.target_file_size(output_level.inner()),
        })
    }
}

fn grandparents_overlapping(
    version:      &Version,
    output_level: Level,
    input:        &CompactionInput,
    output:       &CompactionInput,
) -> Vec<Arc<FileMetadata>> {
    let Some(grandparent_level) = output_level.next() else { return Vec::new() };

    let combined = CompactionInput {
        level: output_level,
        files: input.files.iter().cloned().chain(output.files.iter().cloned()).collect(),
    };
    let Some((smallest, largest)) = combined.key_range() else { return Vec::new() };

    let grandparents = version.level_files(grandparent_level).as_sorted_files();
    let (start, end) = grandparents.range_overlaps_disjoint(Some(smallest), Some(largest));
    grandparents.0[start..end].to_vec()
}

fn grandparent_overlap_size(grandparents: &[Arc<FileMetadata>]) -> u64 {
    grandparents.iter().map(|f| f.file_size()).sum()
}

#[cfg(test)]
mod tests {
    use crate::file_tracking::{FileMetadata, NewFileMetadata, OwnedSortedFiles};
    use crate::format::{EntryType, FileNumber, InternalKey, OwnedInternalKey, SequenceNumber, UserKey};
    use crate::version::Version;

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

    fn empty_pointers() -> [OptionalCompactionPointer; NUM_LEVELS_USIZE] {
        std::array::from_fn(|_| OptionalCompactionPointer::new())
    }

    #[test]
    fn picks_level0_to_base_when_l0_trigger_is_reached() {
        let options = Options::default();
        let l0 = vec![file(1, b"a", b"c", 1024), file(2, b"b", b"d", 1024), file(3, b"c", b"e", 1024), file(4, b"d", b"f", 1024)];
        let levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE] = std::array::from_fn(|i| if i == 0 { l0.clone() } else { Vec::new() });
        let v = version(levels);

        let picked = LevelCompactionPicker::new().pick(&v, &options, &empty_pointers(), false)
            .expect("L0 file count is at the default trigger of 4");

        assert_eq!(picked.input.level, Level::ZERO);
        assert_eq!(picked.input.files.len(), 4);
        assert_eq!(picked.output_level.inner(), 1);
        assert!(!picked.is_trivial_move);
    }

    #[test]
    fn level0_in_progress_suppresses_further_l0_to_base_picks() {
        let options = Options::default();
        let l0 = vec![file(1, b"a", b"c", 1024), file(2, b"b", b"d", 1024), file(3, b"c", b"e", 1024), file(4, b"d", b"f", 1024)];
        let levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE] = std::array::from_fn(|i| if i == 0 { l0.clone() } else { Vec::new() });
        let v = version(levels);

        let picked = LevelCompactionPicker::new().pick(&v, &options, &empty_pointers(), true);
        assert!(picked.is_none());
    }

    #[test]
    fn highest_scoring_non_zero_level_is_picked_over_a_lower_scoring_one() {
        let mut options = Options::default();
        options.max_bytes_for_level_base = 1024;
        options.max_bytes_for_level_multiplier = 10.0;

        let mut levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE] = std::array::from_fn(|_| Vec::new());
        // Level 1 is far over its budget; level 2 is comfortably under.
        levels[1] = vec![file(10, b"a", b"c", 1024 * 5)];
        levels[2] = vec![file(11, b"m", b"p", 64)];
        let v = version(levels);

        let picked = LevelCompactionPicker::new().pick(&v, &options, &empty_pointers(), false)
            .expect("level 1 is well over its target size");
        assert_eq!(picked.input.level.inner(), 1);
    }

    #[test]
    fn single_non_overlapping_file_is_a_trivial_move() {
        let options = Options::default();
        let mut levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE] = std::array::from_fn(|_| Vec::new());
        levels[1] = vec![file(1, b"a", b"c", 1)];
        levels[2] = vec![file(2, b"x", b"z", 1)];
        let v = version(levels);

        let picked = LevelCompactionPicker::new().pick_level(&v, &options, Level::all_levels()[1], &empty_pointers())
            .expect("level 1 has a file to compact");
        assert!(picked.is_trivial_move);
        assert!(picked.output.files.is_empty());
    }

    #[test]
    fn intra_l0_fallback_fires_once_l0_is_far_past_trigger_and_base_overlap_blocks_everything() {
        let options = Options::default();
        let l0: Vec<_> = (1..=6).map(|n| file(n, b"a", b"z", 1024)).collect();
        let mut levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE] = std::array::from_fn(|_| Vec::new());
        levels[0] = l0;
        // A level-1 file already being compacted overlaps every L0 file's range, so the
        // ordinary L0-to-base pick is blocked and the picker must fall back to intra-L0.
        let blocked = file(100, b"a", b"z", 1024);
        blocked.set_being_compacted(true);
        levels[1] = vec![blocked];
        let v = version(levels);

        let picked = LevelCompactionPicker::new().pick(&v, &options, &empty_pointers(), false)
            .expect("L0 is 2 files past (trigger + extra), intra-L0 should fire");
        assert_eq!(picked.output_level, Level::ZERO);
        assert!(picked.output.files.is_empty());
        assert!(picked.input.files.len() >= 4);
    }
}
