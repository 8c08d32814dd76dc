//! The version set (§4.3): owns every column family's current version, the shared file-number
//! counter, and the manifest log those are durably recorded in. Callers are expected to
//! serialize calls into `VersionSet` behind a single mutex, matching §5's single-DB-mutex
//! concurrency model; this type does no internal locking of its own.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::config::Options;
use crate::error::{Error, StatusCode};
use crate::format::{ColumnFamilyId, FileNumber, SequenceNumber};
use crate::write_log::WriteLogWriter;
use super::column_family::ColumnFamily;
use super::manifest;
use super::version_edit::VersionEdit;

/// Roughly the point at which a manifest is rotated to a fresh file carrying a full snapshot,
/// so that recovery never has to replay an unbounded edit history.
const MANIFEST_ROTATION_THRESHOLD: usize = 4 * 1024 * 1024;

const CURRENT_FILE_NAME: &str = "CURRENT";

/// One column family's edits to apply together as part of a single manifest append. Several
/// requests may be grouped into the same `log_and_apply` call, in which case they are written
/// to the manifest as one atomic group (§4.4) and published together.
pub struct LogAndApplyRequest {
    pub column_family: ColumnFamilyId,
    pub edits:         Vec<VersionEdit>,
}

pub struct VersionSet {
    dir:                    PathBuf,
    column_families:        HashMap<ColumnFamilyId, ColumnFamily>,
    next_cf_id:             u32,
    next_file_number:       FileNumber,
    last_sequence:          SequenceNumber,
    min_log_number_to_keep: u64,
    manifest_file_number:   FileNumber,
    manifest_writer:        WriteLogWriter<File>,
    manifest_bytes_written: usize,
}

impl VersionSet {
    /// Opens (or creates) the version set rooted at `dir`. `descriptors` lists the column
    /// families the caller wants open, by name; any descriptor with no matching recovered
    /// column family is created fresh, and any recovered column family absent from
    /// `descriptors` is still loaded (with default options) so its files remain tracked as
    /// live.
    pub fn open(dir: impl AsRef<Path>, descriptors: Vec<(String, Options)>) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(io_err)?;

        match read_current_file(&dir)? {
            Some(manifest_number) => Self::recover_existing(dir, manifest_number, descriptors),
            None => Self::bootstrap(dir, descriptors),
        }
    }

    fn bootstrap(dir: PathBuf, descriptors: Vec<(String, Options)>) -> Result<Self, Error> {
        let manifest_number = FileNumber::new(1);
        let manifest_path = dir.join(manifest::manifest_file_name(manifest_number));
        let file = File::create(&manifest_path).map_err(io_err)?;
        let mut writer = WriteLogWriter::new_empty(file);

        let mut next_cf_id = 0_u32;
        let mut column_families = HashMap::new();
        let mut bytes_written = 0;

        for (name, options) in descriptors {
            let id = ColumnFamilyId(next_cf_id);
            next_cf_id += 1;

            let mut edit = VersionEdit::new_empty();
            edit.column_family = id;
            edit.column_family_add = Some(name.clone());
            edit.log_number = Some(0);
            edit.next_file_number = Some(2);
            edit.last_sequence = Some(SequenceNumber::ZERO);

            let mut payload = Vec::new();
            edit.encode(&mut payload);
            bytes_written += payload.len();
            writer.add_record(&payload).map_err(io_err)?;

            column_families.insert(id, ColumnFamily::new(id, name, options));
        }

        writer.sync_log_data().map_err(io_err)?;
        write_current_file(&dir, manifest_number)?;

        Ok(Self {
            dir,
            column_families,
            next_cf_id,
            next_file_number: FileNumber::new(2),
            last_sequence: SequenceNumber::ZERO,
            min_log_number_to_keep: 0,
            manifest_file_number: manifest_number,
            manifest_writer: writer,
            manifest_bytes_written: bytes_written,
        })
    }

    fn recover_existing(
        dir:             PathBuf,
        manifest_number: FileNumber,
        descriptors:     Vec<(String, Options)>,
    ) -> Result<Self, Error> {
        let manifest_path = dir.join(manifest::manifest_file_name(manifest_number));
        let read_file = File::open(&manifest_path).map_err(io_err)?;

        let recovered = manifest::recover(
            read_file,
            &[],
            &|file_number| sst_or_blob_exists(&dir, file_number),
            false,
        )?;

        let mut options_by_name: HashMap<String, Options> = descriptors.into_iter().collect();
        let mut next_cf_id = 0_u32;
        let mut column_families = HashMap::new();

        for (id, cf) in recovered.column_families {
            next_cf_id = next_cf_id.max(id.0 + 1);
            let options = options_by_name.remove(&cf.name).unwrap_or_default();
            let mut column_family = ColumnFamily::new(id, cf.name, options);
            column_family.install_version(cf.version);
            column_families.insert(id, column_family);
        }

        for (name, options) in options_by_name {
            let id = ColumnFamilyId(next_cf_id);
            next_cf_id += 1;
            column_families.insert(id, ColumnFamily::new(id, name, options));
        }

        let append_file = fs::OpenOptions::new().append(true).open(&manifest_path).map_err(io_err)?;
        let current_size = append_file.metadata().map_err(io_err)?.len();
        #[expect(clippy::cast_possible_truncation, reason = "manifest files stay well under usize::MAX")]
        let manifest_bytes_written = current_size as usize;
        let writer = WriteLogWriter::new_with_offset(append_file, manifest_bytes_written);

        Ok(Self {
            dir,
            column_families,
            next_cf_id,
            next_file_number: FileNumber::new(recovered.next_file_number),
            last_sequence: recovered.last_sequence,
            min_log_number_to_keep: recovered.min_log_number_to_keep,
            manifest_file_number: manifest_number,
            manifest_writer: writer,
            manifest_bytes_written,
        })
    }

    #[must_use]
    pub fn column_family(&self, id: ColumnFamilyId) -> Option<&ColumnFamily> {
        self.column_families.get(&id)
    }

    #[must_use]
    pub fn column_family_mut(&mut self, id: ColumnFamilyId) -> Option<&mut ColumnFamily> {
        self.column_families.get_mut(&id)
    }

    #[must_use]
    pub fn column_families(&self) -> impl Iterator<Item = &ColumnFamily> {
        self.column_families.values()
    }

    #[must_use]
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        self.last_sequence = self.last_sequence.max(sequence);
    }

    /// Allocates the next file number, per §4.1's `AllocateFileNumber`.
    pub fn new_file_number(&mut self) -> Result<FileNumber, Error> {
        let current = self.next_file_number;
        self.next_file_number = current.next()
            .map_err(|_| Error::new(StatusCode::InvalidArgument, "file number counter exhausted"))?;
        Ok(current)
    }

    /// Gives back a file number that turned out not to be needed, as long as it was the most
    /// recently allocated one; otherwise it is simply never reused (no gap-filling).
    pub fn reuse_file_number(&mut self, file_number: FileNumber) {
        if let Ok(successor) = file_number.next() {
            if successor == self.next_file_number {
                self.next_file_number = file_number;
            }
        }
    }

    /// Every file number reachable from any column family's current or retained-old version.
    #[must_use]
    pub fn live_files(&mut self) -> std::collections::HashSet<FileNumber> {
        self.column_families.values_mut().flat_map(ColumnFamily::live_files).collect()
    }

    pub fn add_column_family(&mut self, name: String, options: Options) -> Result<ColumnFamilyId, Error> {
        let id = ColumnFamilyId(self.next_cf_id);
        self.next_cf_id += 1;

        let mut edit = VersionEdit::new_empty();
        edit.column_family = id;
        edit.column_family_add = Some(name.clone());
        edit.log_number = Some(0);
        self.write_edit_and_sync(&edit)?;

        self.column_families.insert(id, ColumnFamily::new(id, name, options));
        Ok(id)
    }

    pub fn drop_column_family(&mut self, id: ColumnFamilyId) -> Result<(), Error> {
        let cf = self.column_families.get_mut(&id)
            .ok_or_else(|| Error::new(StatusCode::InvalidArgument, "unknown column family"))?;
        cf.mark_dropped();

        let mut edit = VersionEdit::new_empty();
        edit.column_family = id;
        edit.column_family_drop = true;
        self.write_edit_and_sync(&edit)
    }

    /// The three-phase version-publication protocol: build every proposed version (`apply`),
    /// append and fsync every edit to the manifest (`log_to_manifest`), then publish the
    /// proposed versions (`install`). A failure during the log phase leaves every column
    /// family's current version untouched.
    pub fn log_and_apply(&mut self, requests: Vec<LogAndApplyRequest>) -> Result<(), Error> {
        if requests.is_empty() {
            return Ok(());
        }

        let mut proposed = Vec::with_capacity(requests.len());
        for request in &requests {
            let cf = self.column_families.get_mut(&request.column_family)
                .ok_or_else(|| Error::new(StatusCode::InvalidArgument, "unknown column family"))?;
            proposed.push(cf.build_proposed_version(&request.edits));
        }

        let mut bytes_written = 0;
        for request in &requests {
            for edit in &request.edits {
                if let Some(seq) = edit.last_sequence {
                    self.last_sequence = self.last_sequence.max(seq);
                }

                let mut stamped = edit.clone();
                stamped.column_family = request.column_family;
                stamped.next_file_number = Some(self.next_file_number.0);
                stamped.last_sequence = Some(self.last_sequence);
                stamped.min_log_number_to_keep = Some(self.min_log_number_to_keep);

                let mut payload = Vec::new();
                stamped.encode(&mut payload);
                bytes_written += payload.len();
                self.manifest_writer.add_record(&payload).map_err(io_err)?;
            }
        }
        self.manifest_writer.sync_log_data().map_err(io_err)?;
        self.manifest_bytes_written += bytes_written;

        for (request, version) in requests.into_iter().zip(proposed) {
            let cf = self.column_families.get_mut(&request.column_family).expect("checked above");
            cf.install_version(version);
        }

        if self.manifest_bytes_written > MANIFEST_ROTATION_THRESHOLD {
            self.rotate_manifest()?;
        }
        Ok(())
    }

    fn write_edit_and_sync(&mut self, edit: &VersionEdit) -> Result<(), Error> {
        let mut payload = Vec::new();
        edit.encode(&mut payload);
        self.manifest_bytes_written += payload.len();
        self.manifest_writer.add_record(&payload).map_err(io_err)?;
        self.manifest_writer.sync_log_data().map_err(io_err)
    }

    /// Starts a fresh manifest file containing one edit per live column family describing its
    /// entire current file set, then repoints `CURRENT` at it. Keeps manifest replay time
    /// bounded regardless of how long the database has been running.
    fn rotate_manifest(&mut self) -> Result<(), Error> {
        let new_number = self.new_file_number()?;
        let path = self.dir.join(manifest::manifest_file_name(new_number));
        let file = File::create(&path).map_err(io_err)?;
        let mut writer = WriteLogWriter::new_empty(file);
        let mut bytes_written = 0;

        for (id, cf) in &self.column_families {
            let mut edit = VersionEdit::new_empty();
            edit.column_family = *id;
            edit.comparator_name = Some("bytewise".to_owned());
            edit.log_number = Some(0);
            edit.next_file_number = Some(self.next_file_number.0);
            edit.last_sequence = Some(self.last_sequence);
            edit.min_log_number_to_keep = Some(self.min_log_number_to_keep);

            for level in crate::format::Level::all_levels() {
                for file in &cf.current_version().level_files(level).as_sorted_files().0.to_vec() {
                    edit.new_files.push(super::version_edit::AddedFile {
                        level,
                        meta: crate::file_tracking::NewFileMetadata {
                            file_number:    file.file_number(),
                            file_size:      file.file_size(),
                            smallest:       crate::format::OwnedInternalKey::new(file.smallest_key()),
                            largest:        crate::format::OwnedInternalKey::new(file.largest_key()),
                            smallest_seqno: file.smallest_seqno(),
                            largest_seqno:  file.largest_seqno(),
                            epoch_number:   file.epoch_number(),
                            checksum:       file.checksum(),
                            creation_time:  None,
                            oldest_ancestor_time: None,
                            persist_user_defined_timestamps: false,
                        },
                    });
                }
            }

            let mut payload = Vec::new();
            edit.encode(&mut payload);
            bytes_written += payload.len();
            writer.add_record(&payload).map_err(io_err)?;
        }

        writer.sync_log_data().map_err(io_err)?;
        write_current_file(&self.dir, new_number)?;

        let old_path = self.dir.join(manifest::manifest_file_name(self.manifest_file_number));
        let _ = fs::remove_file(old_path);

        self.manifest_file_number = new_number;
        self.manifest_writer = writer;
        self.manifest_bytes_written = bytes_written;
        Ok(())
    }
}

fn write_current_file(dir: &Path, manifest_number: FileNumber) -> Result<(), Error> {
    let tmp_path = dir.join(format!("CURRENT.{}.tmp", manifest_number.0));
    let contents = manifest::current_file_contents(manifest_number);
    {
        let mut tmp = File::create(&tmp_path).map_err(io_err)?;
        tmp.write_all(contents.as_bytes()).map_err(io_err)?;
        tmp.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp_path, dir.join(CURRENT_FILE_NAME)).map_err(io_err)
}

fn read_current_file(dir: &Path) -> Result<Option<FileNumber>, Error> {
    match fs::read_to_string(dir.join(CURRENT_FILE_NAME)) {
        Ok(contents) => Ok(manifest::parse_current_file_contents(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(e)),
    }
}

fn sst_or_blob_exists(dir: &Path, file_number: FileNumber) -> bool {
    dir.join(file_number.sst_file_name()).exists() || dir.join(file_number.blob_file_name()).exists()
}

fn io_err(e: impl std::fmt::Display) -> Error {
    Error::new(StatusCode::IoError, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{EntryType, Level, OwnedInternalKey, UserKey};
    use crate::file_tracking::NewFileMetadata;
    use crate::version::version_edit::AddedFile;

    fn descriptors() -> Vec<(String, Options)> {
        vec![("default".to_owned(), Options::default())]
    }

    #[test]
    fn bootstrap_creates_current_and_is_recoverable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vset = VersionSet::open(dir.path(), descriptors()).expect("bootstrap succeeds");
        assert_eq!(vset.column_families().count(), 1);
        drop(vset);

        assert!(dir.path().join("CURRENT").exists());
        assert!(dir.path().join("MANIFEST-000001").exists());

        let reopened = VersionSet::open(dir.path(), descriptors()).expect("reopen recovers");
        assert_eq!(reopened.column_families().count(), 1);
        assert_eq!(reopened.last_sequence(), SequenceNumber::ZERO);
    }

    #[test]
    fn log_and_apply_publishes_and_survives_recovery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut vset = VersionSet::open(dir.path(), descriptors()).expect("bootstrap succeeds");
        let cf_id = vset.column_families().next().expect("one column family").id();

        let file_number = vset.new_file_number().expect("allocate file number");
        std::fs::write(dir.path().join(file_number.sst_file_name()), b"sst-bytes").expect("write sst stub");

        let mut edit = VersionEdit::new_empty();
        edit.new_files.push(AddedFile {
            level: Level::ZERO,
            meta: NewFileMetadata {
                file_number,
                file_size: 9,
                smallest: OwnedInternalKey::new(
                    crate::format::InternalKey::new(UserKey(b"a"), SequenceNumber(1), EntryType::Value),
                ),
                largest: OwnedInternalKey::new(
                    crate::format::InternalKey::new(UserKey(b"m"), SequenceNumber(1), EntryType::Value),
                ),
                smallest_seqno: SequenceNumber(1),
                largest_seqno: SequenceNumber(1),
                epoch_number: 1,
                checksum: None,
                creation_time: None,
                oldest_ancestor_time: None,
                persist_user_defined_timestamps: false,
            },
        });

        vset.log_and_apply(vec![LogAndApplyRequest { column_family: cf_id, edits: vec![edit] }])
            .expect("log_and_apply succeeds");

        let cf = vset.column_family(cf_id).expect("column family exists");
        assert_eq!(cf.current_version().level_files(Level::ZERO).as_sorted_files().0.len(), 1);
        drop(vset);

        let reopened = VersionSet::open(dir.path(), descriptors()).expect("reopen recovers the new file");
        let cf = reopened.column_family(cf_id).expect("column family exists after recovery");
        assert_eq!(cf.current_version().level_files(Level::ZERO).as_sorted_files().0.len(), 1);
    }

    #[test]
    fn add_column_family_is_recovered_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut vset = VersionSet::open(dir.path(), descriptors()).expect("bootstrap succeeds");
        let extra_id = vset.add_column_family("extra".to_owned(), Options::default())
            .expect("add_column_family succeeds");
        drop(vset);

        let reopened = VersionSet::open(dir.path(), vec![
            ("default".to_owned(), Options::default()),
            ("extra".to_owned(), Options::default()),
        ]).expect("reopen recovers both column families");
        assert_eq!(reopened.column_families().count(), 2);
        assert!(reopened.column_family(extra_id).is_some());
    }

    #[test]
    fn log_and_apply_advances_last_sequence_from_the_edit_and_survives_recovery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut vset = VersionSet::open(dir.path(), descriptors()).expect("bootstrap succeeds");
        let cf_id = vset.column_families().next().expect("one column family").id();
        assert_eq!(vset.last_sequence(), SequenceNumber::ZERO);

        let mut edit = VersionEdit::new_empty();
        edit.last_sequence = Some(SequenceNumber(150));
        vset.log_and_apply(vec![LogAndApplyRequest { column_family: cf_id, edits: vec![edit] }])
            .expect("log_and_apply succeeds");

        assert_eq!(vset.last_sequence(), SequenceNumber(150));
        drop(vset);

        let reopened = VersionSet::open(dir.path(), descriptors()).expect("reopen recovers");
        assert_eq!(reopened.last_sequence(), SequenceNumber(150));
    }
}
