//! The version and version-set subsystem (§4.3/§4.4): per-column-family immutable snapshots
//! of the file layout, the differential edits that move from one snapshot to the next, and
//! the manifest log those edits are durably recorded in.

mod column_family;
mod manifest;
mod set;
mod version_builder;
mod version_edit;
mod version_struct;
mod version_tracking;

pub use self::column_family::ColumnFamily;
pub use self::set::{LogAndApplyRequest, VersionSet};
pub use self::version_edit::VersionEdit;
pub use self::version_struct::{ReadPath, Version};
