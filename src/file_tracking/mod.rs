//! File metadata registry (§4.1): allocates file numbers and carries per-file metadata through
//! edits. Liveness is tracked by `Arc` reachability from a published version, not a refcount
//! on the file record itself.

mod file_metadata;
mod sorted_files;

pub use self::file_metadata::{FileMetadata, NewFileMetadata, SeeksRemaining};
pub(crate) use self::file_metadata::SeeksBetweenCompactionOptions;
pub use self::sorted_files::OwnedSortedFiles;
pub(crate) use self::sorted_files::SortedFiles;

pub use crate::format::Level;
