//! Core wire-level types: user/internal keys, sequence numbers, file numbers, and the small
//! enums whose on-disk encoding is pinned by [`bijective_enum_map`].

use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};

use bijective_enum_map::injective_enum_map;
use thiserror::Error;

/// The maximum number of levels in the database.
pub const NUM_LEVELS: u8 = 7;
pub(crate) const NUM_LEVELS_USIZE: usize = NUM_LEVELS as usize;

/// A borrowed user key, with no internal-key footer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserKey<'a>(pub &'a [u8]);

impl Debug for UserKey<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.0))
    }
}

/// A borrowed value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct UserValue<'a>(pub &'a [u8]);

/// Whether an internal-key entry is a live value or a deletion tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EntryType {
    Deletion = 0,
    Value    = 1,
}

impl EntryType {
    pub(crate) const MIN_TYPE: Self = Self::Deletion;
    pub(crate) const MAX_TYPE: Self = Self::Value;
}

impl From<EntryType> for u8 {
    #[inline]
    fn from(entry_type: EntryType) -> Self {
        entry_type as Self
    }
}

impl TryFrom<u8> for EntryType {
    type Error = ();

    #[inline]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Deletion),
            1 => Ok(Self::Value),
            _ => Err(()),
        }
    }
}

/// Monotonic, per-database-open write ordering tag. Internal keys are primarily ordered by
/// user key and, for equal user keys, by descending sequence number (so the newest write for
/// a given key sorts first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub const ZERO: Self = Self(0);
    /// The highest sequence number any live write may carry; one past this is reserved so
    /// that `sequence_and_type_tag` never overflows into the next field.
    pub const MAX_USABLE: Self = Self((1 << 56) - 2);
    pub const MAX: Self = Self((1 << 56) - 1);

    #[must_use]
    pub fn checked_add(self, delta: u64) -> Option<Self> {
        let next = self.0.checked_add(delta)?;
        (next <= Self::MAX_USABLE.0).then_some(Self(next))
    }
}

/// A key as it appears inside a table file: a user key suffixed with an 8-byte footer
/// encoding `(sequence_number, entry_type)`.
#[derive(Clone, Copy)]
pub struct InternalKey<'a> {
    pub user_key:        UserKey<'a>,
    pub sequence_number: SequenceNumber,
    pub entry_type:      EntryType,
}

impl<'a> InternalKey<'a> {
    #[must_use]
    pub fn new(user_key: UserKey<'a>, sequence_number: SequenceNumber, entry_type: EntryType) -> Self {
        Self { user_key, sequence_number, entry_type }
    }

    /// Encode as `(sequence_number << 8) | entry_type`, the footer's eight bytes read as a
    /// little-endian `u64`.
    #[must_use]
    pub fn footer_tag(&self) -> u64 {
        (self.sequence_number.0 << 8) | u64::from(u8::from(self.entry_type))
    }
}

impl Debug for InternalKey<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKey")
            .field("user_key", &self.user_key)
            .field("sequence_number", &self.sequence_number.0)
            .field("entry_type", &self.entry_type)
            .finish()
    }
}

impl PartialEq for InternalKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for InternalKey<'_> {}

impl PartialOrd for InternalKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey<'_> {
    /// Ascending by user key, then descending by sequence number, matching the bytewise
    /// comparator's treatment of the footer as increasing bytes packed with the sequence
    /// number in the high bits: a smaller footer value sorts *after* its user key twin, so
    /// newer writes (larger sequence numbers) come first among equal user keys.
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key.0.cmp(other.user_key.0)
            .then_with(|| other.footer_tag().cmp(&self.footer_tag()))
    }
}

/// A self-describing internal key stored as one contiguous buffer (user key bytes followed by
/// the 8-byte footer), used where an owned copy must outlive the record it was parsed from.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnedInternalKey(Vec<u8>);

impl OwnedInternalKey {
    #[must_use]
    pub fn new(key: InternalKey<'_>) -> Self {
        let mut buf = Vec::with_capacity(key.user_key.0.len() + 8);
        buf.extend_from_slice(key.user_key.0);
        buf.extend_from_slice(&key.footer_tag().to_le_bytes());
        Self(buf)
    }

    #[must_use]
    pub fn as_internal_key(&self) -> InternalKey<'_> {
        let (user_key, footer) = self.0.split_at(self.0.len() - 8);
        let footer = u64::from_le_bytes(footer.try_into().expect("footer is always 8 bytes"));
        InternalKey {
            user_key:        UserKey(user_key),
            sequence_number: SequenceNumber(footer >> 8),
            #[expect(clippy::cast_possible_truncation, reason = "footer tag's low byte is the entry type")]
            entry_type:      EntryType::try_from(footer as u8).unwrap_or(EntryType::Value),
        }
    }
}

impl Debug for OwnedInternalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.as_internal_key(), f)
    }
}

/// Monotonically increasing identifier assigned by the version set. Never reused, even after
/// the file it names is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileNumber(pub u64);

#[derive(Debug, Error)]
#[error("file number counter exhausted")]
pub struct OutOfFileNumbers;

impl FileNumber {
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub(crate) fn next(self) -> Result<Self, OutOfFileNumbers> {
        self.0.checked_add(1).map(Self).ok_or(OutOfFileNumbers)
    }

    #[must_use]
    pub fn sst_file_name(self) -> String {
        format!("{:06}.sst", self.0)
    }

    #[must_use]
    pub fn blob_file_name(self) -> String {
        format!("{:06}.blob", self.0)
    }
}

/// A 0-based column family id, assigned by the version set when the family is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnFamilyId(pub u32);

/// A level in `0..NUM_LEVELS`. Invariant: the inner value is strictly less than [`NUM_LEVELS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Level(u8);

impl Level {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn inner(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }

    #[must_use]
    pub fn all_levels() -> [Self; NUM_LEVELS_USIZE] {
        std::array::from_fn(|i| {
            #[expect(clippy::cast_possible_truncation, reason = "NUM_LEVELS_USIZE fits in u8")]
            Self(i as u8)
        })
    }

    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::try_from(self.0 + 1).ok()
    }
}

impl TryFrom<u8> for Level {
    type Error = ();

    #[inline]
    fn try_from(level: u8) -> Result<Self, Self::Error> {
        if level < NUM_LEVELS { Ok(Self(level)) } else { Err(()) }
    }
}

impl TryFrom<u32> for Level {
    type Error = ();

    #[inline]
    fn try_from(level: u32) -> Result<Self, Self::Error> {
        if level < u32::from(NUM_LEVELS) {
            #[expect(clippy::cast_possible_truncation, reason = "bounded above by NUM_LEVELS")]
            Ok(Self(level as u8))
        } else {
            Err(())
        }
    }
}

pub(crate) trait IndexLevel<T> {
    fn infallible_index(&self, level: Level) -> &T;
    fn infallible_index_mut(&mut self, level: Level) -> &mut T;
}

impl<T> IndexLevel<T> for [T; NUM_LEVELS_USIZE] {
    fn infallible_index(&self, level: Level) -> &T {
        &self[level.as_usize()]
    }

    fn infallible_index_mut(&mut self, level: Level) -> &mut T {
        &mut self[level.as_usize()]
    }
}

/// Tags used in the on-disk encoding of a `VersionEdit`. Values intentionally skip 8, which
/// was used by a removed field in the format this is compatible with; the mapping is kept
/// bijective so a tag can be recovered from a `VersionEditTag` and vice versa without a
/// fallible match arm for every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum VersionEditTag {
    Comparator,
    LogNumber,
    NextFileNumber,
    LastSequence,
    CompactPointer,
    DeletedFile,
    NewFile,
    PrevLogNumber,
    ColumnFamily,
    ColumnFamilyAdd,
    ColumnFamilyDrop,
    MinLogNumberToKeep,
    AtomicGroupSize,
}

injective_enum_map! {
    VersionEditTag, u32,
    Comparator         <=> 1,
    LogNumber          <=> 2,
    NextFileNumber     <=> 3,
    LastSequence       <=> 4,
    CompactPointer     <=> 5,
    DeletedFile        <=> 6,
    NewFile            <=> 7,
    PrevLogNumber      <=> 9,
    ColumnFamily       <=> 200,
    ColumnFamilyAdd    <=> 201,
    ColumnFamilyDrop   <=> 202,
    MinLogNumberToKeep <=> 203,
    AtomicGroupSize     <=> 204,
}

/// Record types used by the 32 KiB block log framing shared by the manifest and the
/// write-ahead log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum WriteLogRecordType {
    Zero   = 0,
    Full   = 1,
    First  = 2,
    Middle = 3,
    Last   = 4,
}

injective_enum_map! {
    WriteLogRecordType, u8,
    Zero   <=> 0,
    Full   <=> 1,
    First  <=> 2,
    Middle <=> 3,
    Last   <=> 4,
}

impl WriteLogRecordType {
    pub(crate) const ALL_TYPES: [Self; 5] =
        [Self::Zero, Self::Full, Self::First, Self::Middle, Self::Last];
}

/// The delta LevelDB-style log framing adds to each record's CRC32C before storing it, so
/// that a corrupted length field does not also, by coincidence, produce a matching checksum
/// over garbage. See `mask_checksum` / `unmask_checksum`.
const CHECKSUM_MASK_DELTA: u32 = 0xa282_ead8;

pub(crate) fn mask_checksum(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(CHECKSUM_MASK_DELTA)
}

pub(crate) fn unmask_checksum(masked_crc: u32) -> u32 {
    masked_crc.wrapping_sub(CHECKSUM_MASK_DELTA).rotate_left(15)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user_key: &'static [u8], seq: u64, entry_type: EntryType) -> InternalKey<'static> {
        InternalKey::new(UserKey(user_key), SequenceNumber(seq), entry_type)
    }

    #[test]
    fn internal_keys_order_by_user_key_first() {
        let a = key(b"a", 5, EntryType::Value);
        let b = key(b"b", 1, EntryType::Value);
        assert!(a < b);
    }

    #[test]
    fn internal_keys_with_equal_user_key_order_by_descending_sequence_number() {
        let newer = key(b"k", 10, EntryType::Value);
        let older = key(b"k", 5, EntryType::Value);
        assert!(newer < older, "a newer write should sort before an older one with the same user key");
    }

    #[test]
    fn owned_internal_key_round_trips_through_as_internal_key() {
        let original = key(b"hello", 42, EntryType::Deletion);
        let owned = OwnedInternalKey::new(original);
        let recovered = owned.as_internal_key();

        assert_eq!(recovered.user_key.0, original.user_key.0);
        assert_eq!(recovered.sequence_number, original.sequence_number);
        assert_eq!(recovered.entry_type, original.entry_type);
    }

    #[test]
    fn mask_checksum_round_trips() {
        for crc in [0u32, 1, 0xdead_beef, u32::MAX] {
            assert_eq!(unmask_checksum(mask_checksum(crc)), crc);
        }
    }

    #[test]
    fn level_rejects_values_at_or_past_num_levels() {
        assert!(Level::try_from(NUM_LEVELS - 1).is_ok());
        assert!(Level::try_from(NUM_LEVELS).is_err());
    }

    #[test]
    fn level_next_is_none_on_the_last_level() {
        let last = Level::try_from(NUM_LEVELS - 1).unwrap();
        assert!(last.next().is_none());
    }

    #[test]
    fn column_family_id_default_is_zero() {
        assert_eq!(ColumnFamilyId::default(), ColumnFamilyId(0));
    }
}
