use std::collections::BTreeSet;

use integer_encoding::{VarInt, VarIntWriter};
use thiserror::Error;

use crate::file_tracking::{FileMetadata, NewFileMetadata};
use crate::format::{
    ColumnFamilyId, EntryType, FileNumber, InternalKey, Level, SequenceNumber, UserKey,
    VersionEditTag,
};

/// A decoded `new file` record, before it has been assigned the bookkeeping state
/// ([`FileMetadata`] wraps `NewFileMetadata` with a refcount and seek budget once it is
/// accepted into a [`super::VersionBuilder`]).
#[derive(Debug, Clone)]
pub struct AddedFile {
    pub level: Level,
    pub meta:  NewFileMetadata,
}

/// A differential record describing a change to one column family's file layout and/or the
/// version set's scalar counters. Edits are pure values: decoding one allocates owned buffers
/// and carries no borrow on the manifest record it came from.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    pub comparator_name:      Option<String>,
    pub log_number:           Option<u64>,
    pub prev_log_number:      Option<u64>,
    pub next_file_number:     Option<u64>,
    pub last_sequence:        Option<SequenceNumber>,
    pub min_log_number_to_keep: Option<u64>,
    pub column_family:        ColumnFamilyId,
    pub column_family_add:    Option<String>,
    pub column_family_drop:   bool,
    pub compact_pointers:     Vec<(Level, crate::format::OwnedInternalKey)>,
    pub deleted_files:        BTreeSet<(Level, FileNumber)>,
    pub new_files:            Vec<AddedFile>,
    /// `Some(n)` marks this edit as the `n`-th of an atomic group of known total size; the
    /// manifest replayer buffers every edit in the group and applies them together.
    pub atomic_group_size:    Option<u32>,
}

#[derive(Debug, Error)]
pub(crate) enum EditDecodeError {
    #[error("truncated edit record")]
    Truncated,
    #[error("invalid varint")]
    InvalidVarint,
    #[error("edit names an invalid level {0}")]
    InvalidLevel(u32),
    #[error("unknown tag {0}")]
    UnknownTag(u32),
    #[error("edit both adds and drops column family {0:?}")]
    AddAndDropSameColumnFamily(ColumnFamilyId),
}

impl VersionEdit {
    #[must_use]
    pub fn new_empty() -> Self {
        Self::default()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        if let Some(name) = &self.comparator_name {
            write_tag(out, VersionEditTag::Comparator);
            write_byte_slice(out, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            write_tag(out, VersionEditTag::LogNumber);
            out.write_varint(n).expect("Vec<u8> writes never fail");
        }
        if let Some(n) = self.prev_log_number {
            write_tag(out, VersionEditTag::PrevLogNumber);
            out.write_varint(n).expect("Vec<u8> writes never fail");
        }
        if let Some(n) = self.next_file_number {
            write_tag(out, VersionEditTag::NextFileNumber);
            out.write_varint(n).expect("Vec<u8> writes never fail");
        }
        if let Some(seq) = self.last_sequence {
            write_tag(out, VersionEditTag::LastSequence);
            out.write_varint(seq.0).expect("Vec<u8> writes never fail");
        }
        if let Some(n) = self.min_log_number_to_keep {
            write_tag(out, VersionEditTag::MinLogNumberToKeep);
            out.write_varint(n).expect("Vec<u8> writes never fail");
        }
        if let Some(size) = self.atomic_group_size {
            write_tag(out, VersionEditTag::AtomicGroupSize);
            out.write_varint(size).expect("Vec<u8> writes never fail");
        }

        write_tag(out, VersionEditTag::ColumnFamily);
        out.write_varint(self.column_family.0).expect("Vec<u8> writes never fail");

        if let Some(name) = &self.column_family_add {
            write_tag(out, VersionEditTag::ColumnFamilyAdd);
            write_byte_slice(out, name.as_bytes());
        }
        if self.column_family_drop {
            write_tag(out, VersionEditTag::ColumnFamilyDrop);
        }

        for (level, key) in &self.compact_pointers {
            write_tag(out, VersionEditTag::CompactPointer);
            out.write_varint(u32::from(level.inner())).expect("Vec<u8> writes never fail");
            write_internal_key(out, key.as_internal_key());
        }
        for (level, file_number) in &self.deleted_files {
            write_tag(out, VersionEditTag::DeletedFile);
            out.write_varint(u32::from(level.inner())).expect("Vec<u8> writes never fail");
            out.write_varint(file_number.0).expect("Vec<u8> writes never fail");
        }
        for added in &self.new_files {
            write_tag(out, VersionEditTag::NewFile);
            out.write_varint(u32::from(added.level.inner())).expect("Vec<u8> writes never fail");
            out.write_varint(added.meta.file_number.0).expect("Vec<u8> writes never fail");
            out.write_varint(added.meta.file_size).expect("Vec<u8> writes never fail");
            write_internal_key(out, added.meta.smallest.as_internal_key());
            write_internal_key(out, added.meta.largest.as_internal_key());
            out.write_varint(added.meta.smallest_seqno.0).expect("Vec<u8> writes never fail");
            out.write_varint(added.meta.largest_seqno.0).expect("Vec<u8> writes never fail");
            out.write_varint(added.meta.epoch_number).expect("Vec<u8> writes never fail");
        }
    }

    pub(crate) fn decode_from(mut input: &[u8]) -> Result<Self, EditDecodeError> {
        let mut edit = Self::new_empty();

        while !input.is_empty() {
            let (tag, rest) = read_varint_u32(input)?;
            input = rest;
            let Ok(tag) = VersionEditTag::try_from(tag) else {
                return Err(EditDecodeError::UnknownTag(tag));
            };

            match tag {
                VersionEditTag::Comparator => {
                    let (bytes, rest) = read_byte_slice(input)?;
                    edit.comparator_name = Some(String::from_utf8_lossy(bytes).into_owned());
                    input = rest;
                },
                VersionEditTag::LogNumber => {
                    let (n, rest) = read_varint_u64(input)?;
                    edit.log_number = Some(n);
                    input = rest;
                },
                VersionEditTag::PrevLogNumber => {
                    let (n, rest) = read_varint_u64(input)?;
                    edit.prev_log_number = Some(n);
                    input = rest;
                },
                VersionEditTag::NextFileNumber => {
                    let (n, rest) = read_varint_u64(input)?;
                    edit.next_file_number = Some(n);
                    input = rest;
                },
                VersionEditTag::LastSequence => {
                    let (n, rest) = read_varint_u64(input)?;
                    edit.last_sequence = Some(SequenceNumber(n));
                    input = rest;
                },
                VersionEditTag::MinLogNumberToKeep => {
                    let (n, rest) = read_varint_u64(input)?;
                    edit.min_log_number_to_keep = Some(n);
                    input = rest;
                },
                VersionEditTag::AtomicGroupSize => {
                    let (n, rest) = read_varint_u32(input)?;
                    edit.atomic_group_size = Some(n);
                    input = rest;
                },
                VersionEditTag::ColumnFamily => {
                    let (n, rest) = read_varint_u32(input)?;
                    edit.column_family = ColumnFamilyId(n);
                    input = rest;
                },
                VersionEditTag::ColumnFamilyAdd => {
                    let (bytes, rest) = read_byte_slice(input)?;
                    edit.column_family_add = Some(String::from_utf8_lossy(bytes).into_owned());
                    input = rest;
                },
                VersionEditTag::ColumnFamilyDrop => {
                    edit.column_family_drop = true;
                },
                VersionEditTag::CompactPointer => {
                    let (level, rest) = read_level(input)?;
                    let (key, rest) = read_internal_key(rest)?;
                    edit.compact_pointers.push((level, key));
                    input = rest;
                },
                VersionEditTag::DeletedFile => {
                    let (level, rest) = read_level(input)?;
                    let (file_number, rest) = read_varint_u64(rest)?;
                    edit.deleted_files.insert((level, FileNumber(file_number)));
                    input = rest;
                },
                VersionEditTag::NewFile => {
                    let (level, rest) = read_level(input)?;
                    let (file_number, rest) = read_varint_u64(rest)?;
                    let (file_size, rest) = read_varint_u64(rest)?;
                    let (smallest, rest) = read_internal_key(rest)?;
                    let (largest, rest) = read_internal_key(rest)?;
                    let (smallest_seqno, rest) = read_varint_u64(rest)?;
                    let (largest_seqno, rest) = read_varint_u64(rest)?;
                    let (epoch_number, rest) = read_varint_u64(rest)?;

                    edit.new_files.push(AddedFile {
                        level,
                        meta: NewFileMetadata {
                            file_number: FileNumber(file_number),
                            file_size,
                            smallest,
                            largest,
                            smallest_seqno: SequenceNumber(smallest_seqno),
                            largest_seqno: SequenceNumber(largest_seqno),
                            epoch_number,
                            checksum: None,
                            creation_time: None,
                            oldest_ancestor_time: None,
                            persist_user_defined_timestamps: false,
                        },
                    });
                    input = rest;
                },
            }
        }

        if edit.column_family_add.is_some() && edit.column_family_drop {
            return Err(EditDecodeError::AddAndDropSameColumnFamily(edit.column_family));
        }

        Ok(edit)
    }
}

fn write_tag(out: &mut Vec<u8>, tag: VersionEditTag) {
    out.write_varint(u32::from(tag)).expect("Vec<u8> writes never fail");
}

fn write_byte_slice(out: &mut Vec<u8>, bytes: &[u8]) {
    out.write_varint(bytes.len()).expect("Vec<u8> writes never fail");
    out.extend_from_slice(bytes);
}

fn write_internal_key(out: &mut Vec<u8>, key: InternalKey<'_>) {
    write_byte_slice(out, key.user_key.0);
    out.write_varint(key.footer_tag()).expect("Vec<u8> writes never fail");
}

fn read_varint_u32(input: &[u8]) -> Result<(u32, &[u8]), EditDecodeError> {
    let (value, len) = u32::decode_var(input).ok_or(EditDecodeError::InvalidVarint)?;
    Ok((value, &input[len..]))
}

fn read_varint_u64(input: &[u8]) -> Result<(u64, &[u8]), EditDecodeError> {
    let (value, len) = u64::decode_var(input).ok_or(EditDecodeError::InvalidVarint)?;
    Ok((value, &input[len..]))
}

fn read_level(input: &[u8]) -> Result<(Level, &[u8]), EditDecodeError> {
    let (level, rest) = read_varint_u32(input)?;
    let level = Level::try_from(level).map_err(|()| EditDecodeError::InvalidLevel(level))?;
    Ok((level, rest))
}

fn read_byte_slice(input: &[u8]) -> Result<(&[u8], &[u8]), EditDecodeError> {
    let (len, rest) = read_varint_u64(input)?;
    let len = usize::try_from(len).map_err(|_| EditDecodeError::Truncated)?;
    if rest.len() < len {
        return Err(EditDecodeError::Truncated);
    }
    Ok(rest.split_at(len))
}

fn read_internal_key(
    input: &[u8],
) -> Result<(crate::format::OwnedInternalKey, &[u8]), EditDecodeError> {
    let (user_key, rest) = read_byte_slice(input)?;
    let (footer_tag, rest) = read_varint_u64(rest)?;
    #[expect(clippy::cast_possible_truncation, reason = "footer tag's low byte is the entry type")]
    let entry_type = EntryType::try_from(footer_tag as u8).unwrap_or(EntryType::Value);
    let key = InternalKey::new(UserKey(user_key), SequenceNumber(footer_tag >> 8), entry_type);
    Ok((crate::format::OwnedInternalKey::new(key), rest))
}

#[cfg(test)]
mod tests {
    use crate::format::EntryType;

    use super::*;

    fn sample_edit() -> VersionEdit {
        let mut edit = VersionEdit::new_empty();
        edit.log_number = Some(7);
        edit.next_file_number = Some(11);
        edit.last_sequence = Some(SequenceNumber(150));
        edit.column_family = ColumnFamilyId(0);
        edit.deleted_files.insert((Level::ZERO, FileNumber(3)));
        edit.new_files.push(AddedFile {
            level: Level::ZERO,
            meta: NewFileMetadata {
                file_number: FileNumber(10),
                file_size: 4096,
                smallest: crate::format::OwnedInternalKey::new(
                    InternalKey::new(UserKey(b"a"), SequenceNumber(101), EntryType::Value),
                ),
                largest: crate::format::OwnedInternalKey::new(
                    InternalKey::new(UserKey(b"z"), SequenceNumber(150), EntryType::Value),
                ),
                smallest_seqno: SequenceNumber(101),
                largest_seqno: SequenceNumber(150),
                epoch_number: 1,
                checksum: None,
                creation_time: None,
                oldest_ancestor_time: None,
                persist_user_defined_timestamps: false,
            },
        });
        edit
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let edit = sample_edit();
        let mut buf = Vec::new();
        edit.encode(&mut buf);

        let decoded = VersionEdit::decode_from(&buf).expect("well-formed edit decodes");

        assert_eq!(decoded.log_number, edit.log_number);
        assert_eq!(decoded.next_file_number, edit.next_file_number);
        assert_eq!(decoded.last_sequence, edit.last_sequence);
        assert_eq!(decoded.deleted_files, edit.deleted_files);
        assert_eq!(decoded.new_files.len(), 1);
        assert_eq!(decoded.new_files[0].meta.file_number, FileNumber(10));
        assert_eq!(decoded.new_files[0].meta.smallest.as_internal_key().user_key.0, b"a");
    }

    #[test]
    fn rejects_simultaneous_add_and_drop() {
        let mut edit = VersionEdit::new_empty();
        edit.column_family_add = Some("cf".to_owned());
        edit.column_family_drop = true;
        let mut buf = Vec::new();
        edit.encode(&mut buf);

        let result = VersionEdit::decode_from(&buf);
        assert!(matches!(result, Err(EditDecodeError::AddAndDropSameColumnFamily(_))));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = Vec::new();
        buf.write_varint(9999_u32).unwrap();
        let result = VersionEdit::decode_from(&buf);
        assert!(matches!(result, Err(EditDecodeError::UnknownTag(9999))));
    }
}
