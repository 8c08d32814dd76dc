//! Tuning parameters recognized by the version set, the compaction picker, and the block
//! cache, plus the constant defaults used when an [`Options`] field is left unset.

use crate::format::NUM_LEVELS;

/// Once there are this many level-0 files, size compactions may target level 0.
pub(crate) const L0_COMPACTION_TRIGGER_DEFAULT: u32 = 4;
/// Once there are this many level-0 files, writes are slowed to let compactions catch up.
pub(crate) const L0_SLOWDOWN_WRITES_TRIGGER_DEFAULT: u32 = 8;
/// Once there are this many level-0 files, writes are stopped entirely.
pub(crate) const L0_STOP_WRITES_TRIGGER_DEFAULT: u32 = 12;

pub(crate) const MAX_BYTES_FOR_LEVEL_BASE_DEFAULT: u64 = 10 * 1024 * 1024;
pub(crate) const MAX_BYTES_FOR_LEVEL_MULTIPLIER_DEFAULT: f64 = 10.0;

pub(crate) const TARGET_FILE_SIZE_BASE_DEFAULT: u64 = 2 * 1024 * 1024;
pub(crate) const TARGET_FILE_SIZE_MULTIPLIER_DEFAULT: f64 = 1.0;

/// A compaction from level `n` to level `n+1` stops expanding once the total size of its
/// grandparent-level overlap reaches this factor times the target file size.
pub(crate) const GRANDPARENT_OVERLAP_SIZE_FACTOR: u64 = 10;
/// A compaction's combined input size across both levels is not expanded past this factor
/// times the target file size.
pub(crate) const EXPANDED_COMPACTION_SIZE_FACTOR: u64 = 25;

/// Minimum number of files considered for an intra-L0 compaction.
pub(crate) const MIN_FILES_FOR_INTRA_L0_COMPACTION: usize = 4;
/// L0 must have accumulated this many files beyond the regular trigger before an intra-L0
/// compaction is attempted.
pub(crate) const INTRA_L0_EXTRA_FILES: u32 = 2;

/// How a single compaction's priority among candidate files in a level is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionPriority {
    ByCompensatedSize,
    OldestLargestSeqFirst,
    OldestSmallestSeqFirst,
    MinOverlappingRatio,
    RoundRobin,
}

/// Whether block cache metadata (not just the block payload) is charged against capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataChargePolicy {
    DontChargeCacheMetadata,
    FullChargeCacheMetadata,
}

/// Per-column-family tuning. Constructed with [`Options::default`] and then overridden field
/// by field; every threshold here has a sensible default so a fresh `Options` is usable as-is.
#[derive(Debug, Clone)]
pub struct Options {
    pub num_levels: u8,
    pub level0_file_num_compaction_trigger: u32,
    pub level0_slowdown_writes_trigger: u32,
    pub level0_stop_writes_trigger: u32,
    pub max_bytes_for_level_base: u64,
    pub max_bytes_for_level_multiplier: f64,
    pub target_file_size_base: u64,
    pub target_file_size_multiplier: f64,
    pub max_compaction_bytes: u64,
    pub compaction_pri: CompactionPriority,
    pub level_compaction_dynamic_level_bytes: bool,
    pub paranoid_checks: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            num_levels: NUM_LEVELS,
            level0_file_num_compaction_trigger: L0_COMPACTION_TRIGGER_DEFAULT,
            level0_slowdown_writes_trigger: L0_SLOWDOWN_WRITES_TRIGGER_DEFAULT,
            level0_stop_writes_trigger: L0_STOP_WRITES_TRIGGER_DEFAULT,
            max_bytes_for_level_base: MAX_BYTES_FOR_LEVEL_BASE_DEFAULT,
            max_bytes_for_level_multiplier: MAX_BYTES_FOR_LEVEL_MULTIPLIER_DEFAULT,
            target_file_size_base: TARGET_FILE_SIZE_BASE_DEFAULT,
            target_file_size_multiplier: TARGET_FILE_SIZE_MULTIPLIER_DEFAULT,
            max_compaction_bytes: TARGET_FILE_SIZE_BASE_DEFAULT * EXPANDED_COMPACTION_SIZE_FACTOR,
            compaction_pri: CompactionPriority::ByCompensatedSize,
            level_compaction_dynamic_level_bytes: false,
            paranoid_checks: false,
        }
    }
}

impl Options {
    /// The target total file size for `level`, growing by `max_bytes_for_level_multiplier`
    /// per level above 1.
    #[must_use]
    pub fn max_bytes_for_level(&self, level: u8) -> f64 {
        if level == 0 {
            self.max_bytes_for_level_base as f64
        } else {
            let mut bytes = self.max_bytes_for_level_base as f64;
            for _ in 1..level {
                bytes *= self.max_bytes_for_level_multiplier;
            }
            bytes
        }
    }

    /// The target size of an output file placed at `level`.
    #[must_use]
    pub fn target_file_size(&self, level: u8) -> u64 {
        let mut size = self.target_file_size_base as f64;
        for _ in 0..level {
            size *= self.target_file_size_multiplier;
        }
        #[expect(clippy::cast_possible_truncation, reason = "file sizes fit well within u64")]
        #[expect(clippy::cast_sign_loss, reason = "size is always positive")]
        (size as u64)
    }
}

/// Tuning for the sharded block cache.
#[derive(Debug, Clone, Copy)]
pub struct BlockCacheOptions {
    pub capacity: usize,
    pub num_shard_bits: Option<u8>,
    pub strict_capacity_limit: bool,
    pub metadata_charge_policy: MetadataChargePolicy,
}

impl Default for BlockCacheOptions {
    fn default() -> Self {
        Self {
            capacity: 8 * 1024 * 1024,
            num_shard_bits: None,
            strict_capacity_limit: false,
            metadata_charge_policy: MetadataChargePolicy::DontChargeCacheMetadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_bytes_for_level_is_flat_through_level_one() {
        let opts = Options::default();
        assert_eq!(opts.max_bytes_for_level(0), MAX_BYTES_FOR_LEVEL_BASE_DEFAULT as f64);
        assert_eq!(opts.max_bytes_for_level(1), MAX_BYTES_FOR_LEVEL_BASE_DEFAULT as f64);
    }

    #[test]
    fn max_bytes_for_level_grows_by_the_multiplier_per_level_above_one() {
        let opts = Options::default();
        let base = MAX_BYTES_FOR_LEVEL_BASE_DEFAULT as f64;
        let mult = MAX_BYTES_FOR_LEVEL_MULTIPLIER_DEFAULT;
        assert_eq!(opts.max_bytes_for_level(2), base * mult);
        assert_eq!(opts.max_bytes_for_level(3), base * mult * mult);
    }

    #[test]
    fn target_file_size_is_flat_at_the_default_multiplier_of_one() {
        let opts = Options::default();
        assert_eq!(opts.target_file_size(0), TARGET_FILE_SIZE_BASE_DEFAULT);
        assert_eq!(opts.target_file_size(3), TARGET_FILE_SIZE_BASE_DEFAULT);
    }

    #[test]
    fn target_file_size_grows_by_the_multiplier_when_set_above_one() {
        let opts = Options { target_file_size_multiplier: 2.0, ..Options::default() };
        assert_eq!(opts.target_file_size(0), TARGET_FILE_SIZE_BASE_DEFAULT);
        assert_eq!(opts.target_file_size(2), TARGET_FILE_SIZE_BASE_DEFAULT * 4);
    }

    #[test]
    fn max_compaction_bytes_defaults_to_the_expanded_compaction_factor() {
        let opts = Options::default();
        assert_eq!(opts.max_compaction_bytes, TARGET_FILE_SIZE_BASE_DEFAULT * EXPANDED_COMPACTION_SIZE_FACTOR);
    }
}
