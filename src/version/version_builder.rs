use std::collections::HashSet;
use std::sync::Arc;

use crate::compaction::OptionalCompactionPointer;
use crate::file_tracking::{FileMetadata, NewFileMetadata, OwnedSortedFiles, SeeksBetweenCompactionOptions};
use crate::format::{FileNumber, IndexLevel as _, Level, NUM_LEVELS_USIZE};
use super::version_edit::VersionEdit;
use super::version_struct::Version;

/// Incrementally reconstructs a `Version` from a base version plus a sequence of applied
/// edits, per §4.3. Added files still carry only the scalar fields decoded from the manifest
/// ([`NewFileMetadata`]); [`VersionBuilder::finish`] wraps each in a fresh [`FileMetadata`]
/// with its reference count and seek budget initialized.
pub(crate) struct VersionBuilder<'a> {
    base_version:             &'a Version,
    vset_compaction_pointers: &'a mut [OptionalCompactionPointer; NUM_LEVELS_USIZE],
    added_files:              [Vec<NewFileMetadata>; NUM_LEVELS_USIZE],
    deleted_files:            [HashSet<FileNumber>; NUM_LEVELS_USIZE],
}

impl<'a> VersionBuilder<'a> {
    #[must_use]
    pub(crate) fn new(
        base_version:             &'a Version,
        vset_compaction_pointers: &'a mut [OptionalCompactionPointer; NUM_LEVELS_USIZE],
    ) -> Self {
        Self {
            base_version,
            vset_compaction_pointers,
            added_files:   Default::default(),
            deleted_files: Default::default(),
        }
    }

    pub(crate) fn apply(&mut self, edit: &VersionEdit) {
        for (level, compact_pointer_key) in &edit.compact_pointers {
            self.vset_compaction_pointers
                .infallible_index_mut(*level)
                .set(compact_pointer_key.as_internal_key());
        }

        for (level, file_number) in &edit.deleted_files {
            self.deleted_files.infallible_index_mut(*level).insert(*file_number);
        }

        for added in &edit.new_files {
            self.deleted_files.infallible_index_mut(added.level).remove(&added.meta.file_number);
            self.added_files.infallible_index_mut(added.level).push(added.meta.clone());
        }
    }

    /// Merges the base version with the staged adds/deletes, producing a new, fully sorted
    /// and validated `Version`. Per level `L >= 1` the result is checked for overlap; callers
    /// in `paranoid_checks` mode additionally cross-check against table footers, which is out
    /// of scope here since SST readers are an external collaborator.
    #[must_use]
    pub(crate) fn finish(mut self, seek_opts: SeeksBetweenCompactionOptions) -> Version {
        let files = Level::all_levels().map(|level| {
            let mut added: Vec<Arc<FileMetadata>> = std::mem::take(self.added_files.infallible_index_mut(level))
                .into_iter()
                .map(|new_file| Arc::new(FileMetadata::new(new_file, seek_opts)))
                .collect();

            OwnedSortedFiles::merge(
                self.base_version.level_files(level).as_sorted_files(),
                &mut added,
                self.deleted_files.infallible_index(level),
                level.inner() == 0,
            )
        });

        Version::new(files)
    }
}

#[cfg(test)]
mod tests {
    use crate::file_tracking::NewFileMetadata;
    use crate::format::{EntryType, IndexLevel as _, InternalKey, OwnedInternalKey, SequenceNumber, UserKey};
    use super::*;

    fn new_file(number: u64) -> NewFileMetadata {
        NewFileMetadata {
            file_number:    FileNumber(number),
            file_size:      4096,
            smallest:       OwnedInternalKey::new(InternalKey::new(UserKey(b"a"), SequenceNumber(1), EntryType::Value)),
            largest:        OwnedInternalKey::new(InternalKey::new(UserKey(b"z"), SequenceNumber(1), EntryType::Value)),
            smallest_seqno: SequenceNumber(1),
            largest_seqno:  SequenceNumber(1),
            epoch_number:   number,
            checksum:       None,
            creation_time:  None,
            oldest_ancestor_time: None,
            persist_user_defined_timestamps: false,
        }
    }

    #[test]
    fn compact_pointer_is_recorded_on_its_level() {
        let base = Version::new_empty();
        let mut pointers: [OptionalCompactionPointer; NUM_LEVELS_USIZE] = Default::default();
        let mut edit = VersionEdit::new_empty();
        let pointer_key = OwnedInternalKey::new(InternalKey::new(UserKey(b"m"), SequenceNumber(5), EntryType::Value));
        edit.compact_pointers.push((Level::ZERO, pointer_key));

        let mut builder = VersionBuilder::new(&base, &mut pointers);
        builder.apply(&edit);
        builder.finish(SeeksBetweenCompactionOptions::default());

        assert!(pointers.infallible_index(Level::ZERO).internal_key().is_some());
    }

    #[test]
    fn adding_a_file_cancels_a_pending_delete_of_the_same_file_number() {
        let base = Version::new_empty();
        let mut pointers: [OptionalCompactionPointer; NUM_LEVELS_USIZE] = Default::default();

        let mut delete_edit = VersionEdit::new_empty();
        delete_edit.deleted_files.insert((Level::ZERO, FileNumber(1)));
        let mut add_edit = VersionEdit::new_empty();
        add_edit.new_files.push(super::super::version_edit::AddedFile { level: Level::ZERO, meta: new_file(1) });

        let mut builder = VersionBuilder::new(&base, &mut pointers);
        builder.apply(&delete_edit);
        builder.apply(&add_edit);
        let version = builder.finish(SeeksBetweenCompactionOptions::default());

        assert_eq!(version.level_files(Level::ZERO).0.len(), 1, "the later add should win over the earlier delete");
    }

    #[test]
    fn finish_sorts_l1_files_by_smallest_key() {
        let base = Version::new_empty();
        let mut pointers: [OptionalCompactionPointer; NUM_LEVELS_USIZE] = Default::default();
        let mut edit = VersionEdit::new_empty();
        let mut first = new_file(1);
        first.smallest = OwnedInternalKey::new(InternalKey::new(UserKey(b"m"), SequenceNumber(1), EntryType::Value));
        first.largest = OwnedInternalKey::new(InternalKey::new(UserKey(b"n"), SequenceNumber(1), EntryType::Value));
        let mut second = new_file(2);
        second.smallest = OwnedInternalKey::new(InternalKey::new(UserKey(b"a"), SequenceNumber(1), EntryType::Value));
        second.largest = OwnedInternalKey::new(InternalKey::new(UserKey(b"b"), SequenceNumber(1), EntryType::Value));
        edit.new_files.push(super::super::version_edit::AddedFile { level: Level::try_from(1u8).unwrap(), meta: first });
        edit.new_files.push(super::super::version_edit::AddedFile { level: Level::try_from(1u8).unwrap(), meta: second });

        let mut builder = VersionBuilder::new(&base, &mut pointers);
        builder.apply(&edit);
        let version = builder.finish(SeeksBetweenCompactionOptions::default());

        let level1 = &version.level_files(Level::try_from(1u8).unwrap()).0;
        assert_eq!(level1[0].file_number(), FileNumber(2));
        assert_eq!(level1[1].file_number(), FileNumber(1));
    }
}
