use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::format::{FileNumber, InternalKey, OwnedInternalKey, SequenceNumber};

/// Tuning for seek-triggered compaction: after roughly one seek per `per_file_size` bytes of a
/// file (never fewer than `min`), a read that had to fall through this file to an
/// overlapping one later in the search order marks the file for compaction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SeeksBetweenCompactionOptions {
    pub min: u32,
    pub per_file_size: u32,
}

impl Default for SeeksBetweenCompactionOptions {
    fn default() -> Self {
        Self { min: 100, per_file_size: 16384 }
    }
}

const MAX_SEEKS_BETWEEN_COMPACTIONS: u32 = (1 << 31) - 1;

/// Result of [`FileMetadata::record_seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeeksRemaining {
    /// The file still has seeks to spare before it is eligible for a seek compaction.
    Remaining(u32),
    /// This seek exhausted the budget; the file should be handed to the seek-compaction path.
    ExhaustedJustNow,
    /// The budget was already exhausted by an earlier seek.
    AlreadyExhausted,
}

/// The fields needed to register a newly-flushed or newly-compacted table file; everything
/// else on [`FileMetadata`] (reference count, being-compacted flag, remaining seek budget) is
/// derived state owned by the version set.
#[derive(Debug, Clone)]
pub struct NewFileMetadata {
    pub file_number:    FileNumber,
    pub file_size:      u64,
    pub smallest:       OwnedInternalKey,
    pub largest:        OwnedInternalKey,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno:  SequenceNumber,
    pub epoch_number:   u64,
    pub checksum:       Option<u32>,
    pub creation_time:  Option<u64>,
    pub oldest_ancestor_time: Option<u64>,
    /// Whether this column family persists user-defined timestamps for keys in this file.
    pub persist_user_defined_timestamps: bool,
}

/// One record of immutable table-file metadata. Invariants (checked by the version builder at
/// construction, not re-checked on every access): `smallest <= largest` by the internal-key
/// order; `smallest_seqno <= largest_seqno`; `file_size > 0`.
///
/// Once a `FileMetadata` is reachable from any published `Version`, every field here is
/// immutable except `being_compacted` and `remaining_seeks`, both of which use interior
/// mutability so a `FileMetadata` can be shared (via `Arc`) across versions without requiring
/// the version-set mutex for a seek-compaction hint. Liveness is not tracked by a refcount on
/// this type: a file is live as long as some `Arc<FileMetadata>` reaches it from the current
/// version or a still-held old version, which [`crate::version::ColumnFamily::live_files`]
/// walks directly.
#[derive(Debug)]
pub struct FileMetadata {
    file_number:    FileNumber,
    file_size:      u64,
    smallest:       OwnedInternalKey,
    largest:        OwnedInternalKey,
    smallest_seqno: SequenceNumber,
    largest_seqno:  SequenceNumber,
    epoch_number:   u64,
    checksum:       Option<u32>,
    creation_time:  Option<u64>,
    oldest_ancestor_time: Option<u64>,
    persist_user_defined_timestamps: bool,

    being_compacted:  AtomicBool,
    remaining_seeks:  AtomicU32,
}

impl FileMetadata {
    #[must_use]
    pub fn new(new_file: NewFileMetadata, seek_opts: SeeksBetweenCompactionOptions) -> Self {
        let allowed_seeks = (new_file.file_size / u64::from(seek_opts.per_file_size))
            .max(u64::from(seek_opts.min))
            .min(u64::from(MAX_SEEKS_BETWEEN_COMPACTIONS));
        #[expect(clippy::cast_possible_truncation, reason = "clamped to MAX_SEEKS_BETWEEN_COMPACTIONS above")]
        let allowed_seeks = allowed_seeks as u32;

        Self {
            file_number:    new_file.file_number,
            file_size:      new_file.file_size,
            smallest:       new_file.smallest,
            largest:        new_file.largest,
            smallest_seqno: new_file.smallest_seqno,
            largest_seqno:  new_file.largest_seqno,
            epoch_number:   new_file.epoch_number,
            checksum:       new_file.checksum,
            creation_time:  new_file.creation_time,
            oldest_ancestor_time: new_file.oldest_ancestor_time,
            persist_user_defined_timestamps: new_file.persist_user_defined_timestamps,
            being_compacted: AtomicBool::new(false),
            remaining_seeks: AtomicU32::new(allowed_seeks),
        }
    }

    #[must_use]
    pub fn file_number(&self) -> FileNumber {
        self.file_number
    }

    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    #[must_use]
    pub fn smallest_key(&self) -> InternalKey<'_> {
        self.smallest.as_internal_key()
    }

    #[must_use]
    pub fn largest_key(&self) -> InternalKey<'_> {
        self.largest.as_internal_key()
    }

    #[must_use]
    pub fn smallest_seqno(&self) -> SequenceNumber {
        self.smallest_seqno
    }

    #[must_use]
    pub fn largest_seqno(&self) -> SequenceNumber {
        self.largest_seqno
    }

    #[must_use]
    pub fn epoch_number(&self) -> u64 {
        self.epoch_number
    }

    #[must_use]
    pub fn checksum(&self) -> Option<u32> {
        self.checksum
    }

    #[must_use]
    pub fn is_being_compacted(&self) -> bool {
        self.being_compacted.load(Ordering::Acquire)
    }

    /// Marks the file as an input to a newly registered compaction. The picker must never
    /// select a file that is already being compacted.
    pub fn set_being_compacted(&self, value: bool) {
        self.being_compacted.store(value, Ordering::Release);
    }

    /// Records that a read seeked past this file to find its value elsewhere. Returns whether
    /// the file's seek budget is now exhausted, in which case the caller should schedule a
    /// seek compaction targeting this file.
    pub fn record_seek(&self) -> SeeksRemaining {
        loop {
            let current = self.remaining_seeks.load(Ordering::Acquire);
            if current == 0 {
                return SeeksRemaining::AlreadyExhausted;
            }
            let next = current - 1;
            if self.remaining_seeks
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return if next == 0 {
                    SeeksRemaining::ExhaustedJustNow
                } else {
                    SeeksRemaining::Remaining(next)
                };
            }
        }
    }

    /// A score used to rank L0 files purely by recency: higher epoch numbers are newer.
    #[must_use]
    pub fn epoch_tiebreak_key(&self) -> (u64, FileNumber) {
        (self.epoch_number, self.file_number)
    }

    #[must_use]
    pub(crate) fn sort_key_l1_plus(&self) -> (InternalKey<'_>, FileNumber) {
        (self.smallest_key(), self.file_number)
    }
}
