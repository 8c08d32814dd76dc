//! The 32 KiB block log framing shared by the manifest and (conceptually) the write-ahead
//! log: records are split into `Full`/`First`/`Middle`/`Last` fragments, each prefixed by a
//! masked CRC32C checksum, a little-endian length, and a type byte.

mod reader;
mod writer;

pub(crate) use self::reader::{ErrorHandler, LogReadError, WriteLogReader};
pub(crate) use self::writer::{LogWriteError, WriteLogWriter};

/// Size of a log block. A record's physical framing never straddles a block boundary; the
/// writer zero-pads the remainder of a block when a new record's header would not fit.
pub(crate) const BLOCK_SIZE: usize = 1 << 15;
/// Checksum (4) + length (2) + type (1).
pub(crate) const HEADER_SIZE: usize = 7;
