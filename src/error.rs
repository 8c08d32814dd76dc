//! Status codes and severities shared by every component in this crate.
//!
//! Individual components (the write-ahead log framing, the manifest replayer, the block
//! cache) define their own narrow `thiserror` enums; this module provides the coarser
//! [`StatusCode`] / [`Severity`] vocabulary that those errors are classified into once they
//! reach the version set or the engine's background-error slot.

use std::fmt::{self, Display, Formatter};

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// Semantic category of a failure, independent of which component raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    NotFound,
    Corruption,
    NotSupported,
    InvalidArgument,
    IoError,
    Incomplete,
    ShutdownInProgress,
    CompactionTooLarge,
    ColumnFamilyDropped,
}

/// How badly a background failure should restrict further engine activity.
///
/// Ordered from least to most severe; [`Severity::max`] is used to accumulate the worst
/// severity seen so far in a background-error slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    None,
    Soft,
    Hard,
    Fatal,
    Unrecoverable,
}

impl Severity {
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if self > other { self } else { other }
    }
}

/// A user-visible error: a [`StatusCode`], an optional [`Severity`] (set only for errors that
/// originated in background work and were stamped onto the engine's error slot), and a
/// human-readable message. For corruption tied to a file, the path is appended to `message`
/// by the raising component rather than carried as a separate field, matching how these
/// errors are logged.
#[derive(Debug, Clone)]
pub struct Error {
    pub code:     StatusCode,
    pub severity: Severity,
    pub message:  String,
}

impl Error {
    #[must_use]
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self { code, severity: Severity::None, message: message.into() }
    }

    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Corruption, message)
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Append a file path to the message, as corruption errors tied to a named file do.
    #[must_use]
    pub fn with_path(mut self, path: impl Display) -> Self {
        self.message = format!("{}: {path}", self.message);
        self
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_max_keeps_the_worse_of_the_two() {
        assert_eq!(Severity::Soft.max(Severity::Hard), Severity::Hard);
        assert_eq!(Severity::Fatal.max(Severity::None), Severity::Fatal);
        assert_eq!(Severity::Unrecoverable.max(Severity::Unrecoverable), Severity::Unrecoverable);
    }

    #[test]
    fn new_error_defaults_to_no_severity() {
        let err = Error::new(StatusCode::InvalidArgument, "bad argument");
        assert_eq!(err.severity, Severity::None);
    }

    #[test]
    fn corruption_sets_the_corruption_status_code() {
        let err = Error::corruption("bad footer");
        assert_eq!(err.code, StatusCode::Corruption);
    }

    #[test]
    fn with_path_appends_the_path_to_the_message() {
        let err = Error::corruption("checksum mismatch").with_path("/data/000012.sst");
        assert_eq!(err.message, "checksum mismatch: /data/000012.sst");
    }

    #[test]
    fn display_includes_the_status_code_and_message() {
        let err = Error::new(StatusCode::NotFound, "no such key");
        assert_eq!(err.to_string(), "NotFound: no such key");
    }
}
