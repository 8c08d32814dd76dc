use std::io::{ErrorKind, Read, Result as IoResult};

use thiserror::Error;

use crate::format::WriteLogRecordType;
use super::{BLOCK_SIZE, HEADER_SIZE};

/// Failure while decoding the physical log framing. Every variant but [`Self::FileReadError`]
/// describes a recoverable corruption: the reader skips the offending bytes and resumes at
/// the next block, matching how a manifest or WAL tolerates a torn trailing write.
#[derive(Debug, Error)]
pub(crate) enum LogReadError {
    #[error("checksum mismatch in log record")]
    ChecksumMismatch,
    #[error("corrupted record length")]
    CorruptedRecordLength,
    #[error("unknown record type {0}")]
    UnknownRecordType(u8),
    #[error("full record type inside an in-progress fragmented record")]
    FullInFragmentedRecord,
    #[error("first record type inside an already in-progress fragmented record")]
    ExtraFirstInFragmentedRecord,
    #[error("middle record type without a preceding first")]
    MiddleWithoutFirst,
    #[error("last record type without a preceding first")]
    LastWithoutFirst,
    #[error("zero-type record encountered")]
    ZeroRecord,
    #[error("error reading log file: {0}")]
    FileReadError(#[from] std::io::Error),
}

/// Receives non-fatal errors encountered while scanning, along with the byte offset at which
/// they were detected, and decides (by its return value) whether scanning should continue.
pub(crate) trait ErrorHandler {
    /// Returns `true` if the reader should skip to the next block and keep scanning.
    fn handle(&mut self, offset: usize, error: LogReadError) -> bool;
}

impl<F: FnMut(usize, LogReadError) -> bool> ErrorHandler for F {
    fn handle(&mut self, offset: usize, error: LogReadError) -> bool {
        self(offset, error)
    }
}

/// Reassembles length-framed records written by [`super::WriteLogWriter`].
pub(crate) struct WriteLogReader<File> {
    file:           File,
    block:          Vec<u8>,
    block_pos:      usize,
    /// Absolute offset of the start of `block` within the file.
    block_offset:   usize,
    eof:            bool,
    fragmented:     bool,
    record_buffer:  Vec<u8>,
}

impl<File: Read> WriteLogReader<File> {
    pub(crate) fn new(file: File) -> Self {
        Self {
            file,
            block:         Vec::new(),
            block_pos:     0,
            block_offset:  0,
            eof:           false,
            fragmented:    false,
            record_buffer: Vec::new(),
        }
    }

    /// Reads the next logical record, reassembling fragments as needed. Returns `Ok(None)` at
    /// a clean end of file. Truncation mid-record (a `First`/`Middle` fragment with no
    /// following `Last`) is treated the same way LevelDB treats it: the partial record is
    /// discarded silently, since fsync is what guarantees durability, not this framing.
    pub(crate) fn read_record(
        &mut self,
        on_error: &mut dyn ErrorHandler,
    ) -> IoResult<Option<Vec<u8>>> {
        loop {
            match self.read_physical_record(on_error)? {
                Some((WriteLogRecordType::Full, fragment)) => {
                    if self.fragmented {
                        on_error.handle(self.record_offset(), LogReadError::FullInFragmentedRecord);
                        self.fragmented = false;
                        self.record_buffer.clear();
                    }
                    return Ok(Some(fragment));
                },
                Some((WriteLogRecordType::First, fragment)) => {
                    if self.fragmented {
                        on_error.handle(
                            self.record_offset(),
                            LogReadError::ExtraFirstInFragmentedRecord,
                        );
                    }
                    self.record_buffer.clear();
                    self.record_buffer.extend_from_slice(&fragment);
                    self.fragmented = true;
                },
                Some((WriteLogRecordType::Middle, fragment)) => {
                    if self.fragmented {
                        self.record_buffer.extend_from_slice(&fragment);
                    } else {
                        on_error.handle(self.record_offset(), LogReadError::MiddleWithoutFirst);
                    }
                },
                Some((WriteLogRecordType::Last, fragment)) => {
                    if self.fragmented {
                        self.record_buffer.extend_from_slice(&fragment);
                        self.fragmented = false;
                        return Ok(Some(std::mem::take(&mut self.record_buffer)));
                    }
                    on_error.handle(self.record_offset(), LogReadError::LastWithoutFirst);
                },
                Some((WriteLogRecordType::Zero, _)) => {
                    // Trailing zero padding at the end of a block; not itself an error signal,
                    // since the writer emits it deliberately when a header would not fit.
                },
                None => return Ok(None),
            }
        }
    }

    fn record_offset(&self) -> usize {
        self.block_offset + self.block_pos
    }

    fn read_physical_record(
        &mut self,
        on_error: &mut dyn ErrorHandler,
    ) -> IoResult<Option<(WriteLogRecordType, Vec<u8>)>> {
        loop {
            if self.block.len() - self.block_pos < HEADER_SIZE {
                if !self.fill_block_until_eof()? {
                    return Ok(None);
                }
                continue;
            }

            let header_start = self.block_pos;
            let header = &self.block[header_start..header_start + HEADER_SIZE];
            let masked_crc = u32::from_le_bytes(header[0..4].try_into().expect("4 bytes"));
            let len = u16::from_le_bytes(header[4..6].try_into().expect("2 bytes")) as usize;
            let record_type_byte = header[6];

            if record_type_byte == 0 && len == 0 {
                // Zero trailer; skip the rest of this block.
                self.block_pos = self.block.len();
                continue;
            }

            let Ok(record_type) = WriteLogRecordType::try_from(record_type_byte) else {
                if !on_error.handle(self.record_offset(), LogReadError::UnknownRecordType(record_type_byte)) {
                    return Ok(None);
                }
                self.block_pos = self.block.len();
                continue;
            };

            if self.block.len() - header_start - HEADER_SIZE < len {
                if !on_error.handle(self.record_offset(), LogReadError::CorruptedRecordLength) {
                    return Ok(None);
                }
                self.block_pos = self.block.len();
                continue;
            }

            let payload_start = header_start + HEADER_SIZE;
            let fragment = &self.block[payload_start..payload_start + len];
            let crc = crate::format::unmask_checksum(masked_crc);
            let seed = crc32c::crc32c(&[record_type_byte]);
            let expected = crc32c::crc32c_append(seed, fragment);

            self.block_pos = payload_start + len;

            if crc != expected {
                if !on_error.handle(self.record_offset(), LogReadError::ChecksumMismatch) {
                    return Ok(None);
                }
                continue;
            }

            if record_type == WriteLogRecordType::Zero {
                if !on_error.handle(self.record_offset(), LogReadError::ZeroRecord) {
                    return Ok(None);
                }
                continue;
            }

            return Ok(Some((record_type, fragment.to_vec())));
        }
    }

    /// Reads the next 32 KiB block (or what remains of the file). Returns `false` at a clean
    /// end of file with no partial block left to consume.
    fn fill_block_until_eof(&mut self) -> IoResult<bool> {
        if self.eof {
            return Ok(false);
        }

        self.block_offset += self.block.len();
        self.block.clear();
        self.block.resize(BLOCK_SIZE, 0);
        self.block_pos = 0;

        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.file.read(&mut self.block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.block.truncate(filled);
        if filled < BLOCK_SIZE {
            self.eof = true;
        }
        Ok(filled > 0)
    }
}
