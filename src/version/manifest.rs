//! Version-edit encoding is handled by [`super::version_edit`]; this module is the replay
//! state machine described in §4.4: applying a manifest's edit stream to reconstruct the
//! per-column-family state a producing process had at its last successful append.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::Arc;

use crate::error::{Error, StatusCode};
use crate::file_tracking::{FileMetadata, NewFileMetadata, OwnedSortedFiles, SeeksBetweenCompactionOptions};
use crate::format::{ColumnFamilyId, FileNumber, IndexLevel as _, Level, NUM_LEVELS_USIZE, SequenceNumber};
use crate::write_log::{LogReadError, WriteLogReader};
use super::version_edit::VersionEdit;
use super::version_struct::Version;

/// `MANIFEST-NNNNNN`.
#[must_use]
pub(crate) fn manifest_file_name(number: FileNumber) -> String {
    format!("MANIFEST-{:06}", number.0)
}

/// The single line written to the `CURRENT` file.
#[must_use]
pub(crate) fn current_file_contents(manifest_number: FileNumber) -> String {
    format!("{}\n", manifest_file_name(manifest_number))
}

#[must_use]
pub(crate) fn parse_current_file_contents(contents: &str) -> Option<FileNumber> {
    let name = contents.strip_suffix('\n')?;
    let digits = name.strip_prefix("MANIFEST-")?;
    digits.parse::<u64>().ok().map(FileNumber)
}

/// Per-column-family state accumulated while replaying the manifest. Mirrors the
/// accumulate-then-merge shape of [`super::version_builder::VersionBuilder`], but starts from
/// an implicit empty base (the manifest holds every edit needed to reconstruct the column
/// family from scratch) and tracks missing files for point-in-time recovery.
struct CfReplayState {
    name:            String,
    added:           [Vec<NewFileMetadata>; NUM_LEVELS_USIZE],
    deleted:         [HashSet<FileNumber>; NUM_LEVELS_USIZE],
    log_number:      Option<u64>,
    prev_log_number: Option<u64>,
    comparator_name: Option<String>,
}

impl CfReplayState {
    fn new(name: String) -> Self {
        Self {
            name,
            added:           Default::default(),
            deleted:         Default::default(),
            log_number:      None,
            prev_log_number: None,
            comparator_name: None,
        }
    }

    fn apply_edit(&mut self, edit: &VersionEdit) {
        if let Some(n) = edit.log_number {
            self.log_number = Some(n);
        }
        if let Some(n) = edit.prev_log_number {
            self.prev_log_number = Some(n);
        }
        if let Some(name) = &edit.comparator_name {
            self.comparator_name = Some(name.clone());
        }
        for (level, file_number) in &edit.deleted_files {
            self.deleted.infallible_index_mut(*level).insert(*file_number);
        }
        for added in &edit.new_files {
            self.deleted.infallible_index_mut(added.level).remove(&added.meta.file_number);
            self.added.infallible_index_mut(added.level).push(added.meta.clone());
        }
    }

    /// Consumes the accumulated adds/deletes into a `Version`, dropping any file that is no
    /// longer present on disk and reporting every such file so the caller can apply its
    /// point-in-time recovery policy.
    fn into_version(mut self, file_exists: &dyn Fn(FileNumber) -> bool) -> (Version, HashSet<FileNumber>) {
        let seek_opts = SeeksBetweenCompactionOptions::default();
        let mut missing = HashSet::new();

        let files = Level::all_levels().map(|level| {
            let mut added: Vec<Arc<FileMetadata>> = std::mem::take(self.added.infallible_index_mut(level))
                .into_iter()
                .filter(|new_file| {
                    if file_exists(new_file.file_number) {
                        true
                    } else {
                        missing.insert(new_file.file_number);
                        false
                    }
                })
                .map(|new_file| Arc::new(FileMetadata::new(new_file, seek_opts)))
                .collect();

            OwnedSortedFiles::merge(
                crate::file_tracking::SortedFiles(&[]),
                &mut added,
                self.deleted.infallible_index(level),
                level.inner() == 0,
            )
        });

        (Version::new(files), missing)
    }
}

/// Replay state shared by all column families, before any are finalized into `Version`s.
struct ReplayState {
    cfs:                    HashMap<ColumnFamilyId, CfReplayState>,
    next_file_number:       Option<u64>,
    last_sequence:          Option<SequenceNumber>,
    min_log_number_to_keep: Option<u64>,

    /// Buffered edits for an in-progress atomic group, per §4.4: a contiguous run of edits
    /// applied all-or-nothing. Column-family add/drop inside a group is illegal.
    atomic_group: Option<AtomicGroupState>,
}

struct AtomicGroupState {
    expected_size: u32,
    buffered:      Vec<VersionEdit>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ManifestError {
    #[error("manifest error reading log framing: {0}")]
    Read(#[from] std::io::Error),
    #[error("corrupt edit record in manifest: {0}")]
    Corrupt(String),
    #[error("manifest lacks a required scalar: {0}")]
    MissingScalar(&'static str),
    #[error("manifest references unknown column family {0:?}")]
    UnknownColumnFamily(ColumnFamilyId),
    #[error("file {0:?} referenced by the manifest is missing from disk")]
    MissingFile(FileNumber),
}

/// The reconstructed state of one column family after a successful replay.
pub(crate) struct RecoveredColumnFamily {
    pub name:       String,
    pub version:    Version,
    pub log_number: u64,
}

/// The reconstructed version-set scalars plus every recovered column family.
pub(crate) struct RecoveredState {
    pub column_families:        Vec<(ColumnFamilyId, RecoveredColumnFamily)>,
    pub next_file_number:       u64,
    pub last_sequence:          SequenceNumber,
    pub min_log_number_to_keep: u64,
}

/// Replays a manifest log in full, per §4.3's `Recover` operation.
///
/// `descriptors` lists the column families the caller expects to find (id, name); any column
/// family named on disk but not in this list is created on the fly, matching how a fresh
/// `ColumnFamilyAdd` edit is handled during normal operation. `file_exists` lets the caller
/// check SST/blob presence without this module depending on a filesystem abstraction.
pub(crate) fn recover<File: Read>(
    log:                    File,
    descriptors:            &[(ColumnFamilyId, String)],
    file_exists:            &dyn Fn(FileNumber) -> bool,
    point_in_time_recovery: bool,
) -> Result<RecoveredState, Error> {
    let mut reader = WriteLogReader::new(log);
    let mut state = ReplayState {
        cfs: descriptors.iter()
            .map(|(id, name)| (*id, CfReplayState::new(name.clone())))
            .collect(),
        next_file_number:       None,
        last_sequence:          None,
        min_log_number_to_keep: None,
        atomic_group:           None,
    };

    let mut on_error = |_offset: usize, err: LogReadError| {
        tracing::warn!(error = %err, "recoverable corruption while scanning manifest");
        true
    };

    loop {
        let record = reader.read_record(&mut on_error)
            .map_err(|io| manifest_err_to_error(ManifestError::Read(io)))?;
        let Some(record) = record else { break };

        let edit = VersionEdit::decode_from(&record)
            .map_err(|e| manifest_err_to_error(ManifestError::Corrupt(e.to_string())))?;

        apply_one_edit(&mut state, edit)?;
    }

    if let Some(group) = state.atomic_group.take() {
        tracing::warn!(
            expected = group.expected_size,
            got = group.buffered.len(),
            "discarding incomplete atomic group at end of manifest",
        );
    }

    finalize(state, file_exists, point_in_time_recovery)
}

fn apply_one_edit(state: &mut ReplayState, edit: VersionEdit) -> Result<(), Error> {
    let is_cf_lifecycle = edit.column_family_add.is_some() || edit.column_family_drop;

    if let Some(group_size) = edit.atomic_group_size {
        if is_cf_lifecycle {
            return Err(manifest_err_to_error(ManifestError::Corrupt(
                "column family add/drop is not allowed inside an atomic group".to_owned(),
            )));
        }
        if state.atomic_group.is_some() {
            tracing::warn!("atomic group re-started before the previous one completed");
        }
        state.atomic_group = Some(AtomicGroupState { expected_size: group_size, buffered: vec![edit] });
        return maybe_commit_group(state);
    }

    if let Some(group) = &mut state.atomic_group {
        if is_cf_lifecycle {
            return Err(manifest_err_to_error(ManifestError::Corrupt(
                "column family add/drop is not allowed inside an atomic group".to_owned(),
            )));
        }
        group.buffered.push(edit);
        return maybe_commit_group(state);
    }

    apply_scalars(state, &edit);
    if is_cf_lifecycle {
        apply_cf_lifecycle(state, &edit);
        if edit.column_family_add.is_some() {
            if let Some(cf) = state.cfs.get_mut(&edit.column_family) {
                cf.apply_edit(&edit);
            }
        }
    } else {
        let cf = state.cfs.get_mut(&edit.column_family)
            .ok_or_else(|| manifest_err_to_error(ManifestError::UnknownColumnFamily(edit.column_family)))?;
        cf.apply_edit(&edit);
    }
    Ok(())
}

fn maybe_commit_group(state: &mut ReplayState) -> Result<(), Error> {
    let Some(group) = &state.atomic_group else { return Ok(()) };
    #[expect(clippy::cast_possible_truncation, reason = "group sizes are small")]
    if group.buffered.len() as u32 != group.expected_size {
        return Ok(());
    }

    let group = state.atomic_group.take().expect("checked is_some above");
    for edit in &group.buffered {
        apply_scalars(state, edit);
        let cf = state.cfs.get_mut(&edit.column_family)
            .ok_or_else(|| manifest_err_to_error(ManifestError::UnknownColumnFamily(edit.column_family)))?;
        cf.apply_edit(edit);
    }
    Ok(())
}

fn apply_scalars(state: &mut ReplayState, edit: &VersionEdit) {
    if let Some(n) = edit.next_file_number {
        state.next_file_number = Some(n);
    }
    if let Some(seq) = edit.last_sequence {
        state.last_sequence = Some(seq);
    }
    if let Some(n) = edit.min_log_number_to_keep {
        state.min_log_number_to_keep = Some(n);
    }
}

fn apply_cf_lifecycle(state: &mut ReplayState, edit: &VersionEdit) {
    if let Some(name) = &edit.column_family_add {
        state.cfs.entry(edit.column_family).or_insert_with(|| CfReplayState::new(name.clone()));
    } else if edit.column_family_drop {
        state.cfs.remove(&edit.column_family);
    }
}

fn finalize(
    state:                  ReplayState,
    file_exists:            &dyn Fn(FileNumber) -> bool,
    point_in_time_recovery: bool,
) -> Result<RecoveredState, Error> {
    let next_file_number = state.next_file_number
        .ok_or_else(|| manifest_err_to_error(ManifestError::MissingScalar("next_file_number")))?;
    if next_file_number == 0 {
        return Err(Error::corruption("manifest declares next_file_number = 0"));
    }
    let last_sequence = state.last_sequence
        .ok_or_else(|| manifest_err_to_error(ManifestError::MissingScalar("last_sequence")))?;

    let mut column_families = Vec::with_capacity(state.cfs.len());
    for (id, cf) in state.cfs {
        let log_number = cf.log_number
            .ok_or_else(|| manifest_err_to_error(ManifestError::MissingScalar("log_number")))?;
        let name = cf.name.clone();
        let (version, missing) = cf.into_version(file_exists);

        if !missing.is_empty() {
            if point_in_time_recovery {
                tracing::warn!(cf = %name, ?missing, "point-in-time recovery: tolerating missing files");
            } else {
                let file = *missing.iter().next().expect("checked non-empty");
                return Err(manifest_err_to_error(ManifestError::MissingFile(file)).with_path(&name));
            }
        }

        column_families.push((id, RecoveredColumnFamily { name, version, log_number }));
    }

    Ok(RecoveredState {
        column_families,
        next_file_number,
        last_sequence,
        min_log_number_to_keep: state.min_log_number_to_keep.unwrap_or(0),
    })
}

fn manifest_err_to_error(err: ManifestError) -> Error {
    match err {
        ManifestError::Read(io) => Error::new(StatusCode::IoError, io.to_string()),
        other => Error::corruption(other.to_string()),
    }
}
