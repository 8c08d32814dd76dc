//! The leveled compaction picker (§4.5): decides which files to compact next, given a
//! column family's current version, its compaction pointers, and the files already claimed by
//! an in-flight compaction.

mod compaction_pointer;
mod picker;

pub use self::compaction_pointer::OptionalCompactionPointer;
pub use self::picker::{CompactionInput, LevelCompactionPicker, PickedCompaction};
