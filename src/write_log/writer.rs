use std::io::{Result as IoResult, Write};

use thiserror::Error;

use crate::format::WriteLogRecordType;
use super::{BLOCK_SIZE, HEADER_SIZE};

/// Failure while appending a record. Writers to the manifest or WAL treat this as fatal for
/// the write in progress: the caller must abandon whatever in-memory state the write was
/// meant to persist, since we cannot know how many bytes of a torn record reached disk.
#[derive(Debug, Error)]
#[error("failed to write log record: {0}")]
pub(crate) struct LogWriteError(#[from] pub std::io::Error);

/// Appends length-framed, checksummed records to a 32 KiB-block log file.
pub(crate) struct WriteLogWriter<File> {
    log_file:        File,
    /// Precomputed CRC32C of each record type's single type byte, so that
    /// `crc32c(checksum_seed, payload)` finishes the checksum without re-hashing the type byte.
    type_checksums:  [u32; 5],
    /// Bytes left in the current 32 KiB block.
    remaining_space: usize,
}

impl<File: Write> WriteLogWriter<File> {
    pub(crate) fn new_empty(log_file: File) -> Self {
        Self::new_with_offset(log_file, 0)
    }

    /// `initial_offset` is the byte offset the underlying file is already positioned at (for
    /// example, when appending to an existing manifest file).
    pub(crate) fn new_with_offset(log_file: File, initial_offset: usize) -> Self {
        let type_checksums = WriteLogRecordType::ALL_TYPES
            .map(|record_type| crc32c::crc32c(&[record_type as u8]));

        Self {
            log_file,
            type_checksums,
            remaining_space: BLOCK_SIZE - (initial_offset % BLOCK_SIZE),
        }
    }

    pub(crate) fn sync_log_data(&mut self) -> IoResult<()> {
        self.log_file.flush()
    }

    pub(crate) fn add_record(&mut self, record: &[u8]) -> Result<(), LogWriteError> {
        self.inner_add_record(record)?;
        self.log_file.flush().map_err(LogWriteError)?;
        Ok(())
    }

    fn inner_add_record(&mut self, mut record: &[u8]) -> Result<(), LogWriteError> {
        let mut first_physical = true;

        loop {
            if self.remaining_space < HEADER_SIZE {
                if self.remaining_space > 0 {
                    let zeros = [0_u8; HEADER_SIZE];
                    self.log_file.write_all(&zeros[..self.remaining_space]).map_err(LogWriteError)?;
                }
                self.remaining_space = BLOCK_SIZE;
            }

            let space_for_payload = self.remaining_space - HEADER_SIZE;
            let fragment_len = space_for_payload.min(record.len());
            let last_physical = fragment_len == record.len();

            let record_type = match (first_physical, last_physical) {
                (true, true)   => WriteLogRecordType::Full,
                (true, false)  => WriteLogRecordType::First,
                (false, true)  => WriteLogRecordType::Last,
                (false, false) => WriteLogRecordType::Middle,
            };

            let (fragment, rest) = record.split_at(fragment_len);
            self.write_physical_record(record_type, fragment)?;
            record = rest;
            first_physical = false;

            if last_physical {
                return Ok(());
            }
        }
    }

    fn write_physical_record(
        &mut self,
        record_type: WriteLogRecordType,
        fragment:    &[u8],
    ) -> Result<(), LogWriteError> {
        #[expect(clippy::cast_possible_truncation, reason = "fragment never exceeds BLOCK_SIZE")]
        let len = fragment.len() as u16;

        let seed = self.type_checksums[record_type as usize];
        let crc = crc32c::crc32c_append(seed, fragment);
        let masked_crc = crate::format::mask_checksum(crc);

        self.log_file.write_all(&masked_crc.to_le_bytes()).map_err(LogWriteError)?;
        self.log_file.write_all(&len.to_le_bytes()).map_err(LogWriteError)?;
        self.log_file.write_all(&[record_type as u8]).map_err(LogWriteError)?;
        self.log_file.write_all(fragment).map_err(LogWriteError)?;

        self.remaining_space -= HEADER_SIZE + fragment.len();
        Ok(())
    }
}
