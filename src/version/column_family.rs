use std::collections::HashSet;
use std::sync::Arc;

use crate::compaction::OptionalCompactionPointer;
use crate::config::Options;
use crate::file_tracking::SeeksBetweenCompactionOptions;
use crate::format::{ColumnFamilyId, FileNumber, IndexLevel as _, Level, NUM_LEVELS_USIZE};
use super::version_builder::VersionBuilder;
use super::version_edit::VersionEdit;
use super::version_struct::Version;
use super::version_tracking::{CurrentVersion, OldVersions};

/// One column family: a named, independently-configured keyspace. Owns its own chain of
/// versions and compaction bookkeeping; shares the manifest log and file-number counter with
/// every other column family in the same [`super::VersionSet`].
pub struct ColumnFamily {
    id:      ColumnFamilyId,
    name:    String,
    options: Options,

    current:             CurrentVersion,
    old_versions:        OldVersions,
    compaction_pointers: [OptionalCompactionPointer; NUM_LEVELS_USIZE],
    /// Files currently claimed by an in-flight compaction, per level; disjoint from what the
    /// picker is allowed to select next.
    compactions_in_progress: [HashSet<FileNumber>; NUM_LEVELS_USIZE],

    dropped: bool,
}

impl ColumnFamily {
    #[must_use]
    pub fn new(id: ColumnFamilyId, name: String, options: Options) -> Self {
        Self {
            id,
            name,
            options,
            current:                 CurrentVersion::new_empty(),
            old_versions:            OldVersions::new(),
            compaction_pointers:     Default::default(),
            compactions_in_progress: Default::default(),
            dropped:                 false,
        }
    }

    #[must_use]
    pub fn id(&self) -> ColumnFamilyId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The currently published version.
    #[must_use]
    pub fn current_version(&self) -> &Arc<Version> {
        self.current.version()
    }

    /// Whether the current version's compaction scores call for a size-driven compaction.
    #[must_use]
    pub fn needs_compaction(&self) -> bool {
        self.current.needs_compaction()
    }

    /// The highest-scoring level whose compaction score is `>= 1`, if any.
    #[must_use]
    pub fn size_compaction(&self) -> Option<Level> {
        self.current.size_compaction()
    }

    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    #[must_use]
    pub fn compaction_pointer(&self, level: Level) -> Option<crate::format::InternalKey<'_>> {
        self.compaction_pointers.infallible_index(level).internal_key()
    }

    #[must_use]
    pub fn files_being_compacted(&self, level: Level) -> &HashSet<FileNumber> {
        self.compactions_in_progress.infallible_index(level)
    }

    pub fn register_compaction_inputs(&mut self, level: Level, files: impl IntoIterator<Item = FileNumber>) {
        self.compactions_in_progress.infallible_index_mut(level).extend(files);
    }

    pub fn clear_compaction_inputs(&mut self, level: Level, files: &[FileNumber]) {
        let set = self.compactions_in_progress.infallible_index_mut(level);
        for file in files {
            set.remove(file);
        }
    }

    pub fn has_level0_compaction_in_progress(&self) -> bool {
        !self.compactions_in_progress[0].is_empty()
    }

    /// Builds a new version from the current one plus `edits`, in order, without publishing it.
    /// Also updates the stored compaction pointers, since those are scalar version-set state
    /// rather than part of the published version itself. Split out from [`Self::apply_edits`]
    /// so a caller can log the edits to the manifest between building and publishing.
    pub fn build_proposed_version(&mut self, edits: &[VersionEdit]) -> Version {
        let mut builder = VersionBuilder::new(self.current.version(), &mut self.compaction_pointers);
        for edit in edits {
            builder.apply(edit);
        }
        builder.finish(SeeksBetweenCompactionOptions::default())
    }

    /// Publishes an already-built version, retiring the previous current version into
    /// [`OldVersions`] rather than dropping it outright, since readers may still hold a strong
    /// reference to it.
    pub fn install_version(&mut self, new_version: Version) -> Arc<Version> {
        let replaced = self.current.set(new_version, &self.options);
        self.old_versions.add_old_version(Arc::clone(&replaced));
        replaced
    }

    /// Builds a new version from the current one plus `edits`, in order, and publishes it.
    pub fn apply_edits(&mut self, edits: &[VersionEdit]) -> Arc<Version> {
        let new_version = self.build_proposed_version(edits);
        self.install_version(new_version)
    }

    /// Files reachable from the current version or from any version a reader might still
    /// hold, used by the version set to decide what remains live on disk.
    pub fn live_files(&mut self) -> HashSet<FileNumber> {
        let mut live = HashSet::new();
        for file in self.current.version().all_files() {
            live.insert(file.file_number());
        }
        for old in self.old_versions.live() {
            for file in old.all_files() {
                live.insert(file.file_number());
            }
        }
        live
    }
}
