use std::sync::{Arc, Weak};

use crate::config::Options;
use crate::format::Level;
use super::version_struct::Version;

/// The published version plus the size-compaction level it implies, recomputed every time a
/// new version is installed.
pub(crate) struct CurrentVersion {
    version:         Arc<Version>,
    /// The highest-scoring level whose compaction score is `>= 1`, if any.
    size_compaction: Option<Level>,
}

impl CurrentVersion {
    #[must_use]
    pub(crate) fn new_empty() -> Self {
        Self { version: Arc::new(Version::new_empty()), size_compaction: None }
    }

    #[must_use]
    pub(crate) fn new(version: Version, options: &Options) -> Self {
        let size_compaction = version.compute_compaction_scores(options).into_iter()
            .find(|&(_, score)| score >= 1.0)
            .map(|(level, _)| level);
        Self { version: Arc::new(version), size_compaction }
    }

    /// Swap in `new_version`, returning the version that was current until now so the caller
    /// can retire it (see [`OldVersions::add_old_version`]).
    pub(crate) fn set(&mut self, new_version: Version, options: &Options) -> Arc<Version> {
        let replaced = std::mem::replace(self, Self::new(new_version, options));
        replaced.version
    }

    #[must_use]
    pub(crate) fn version(&self) -> &Arc<Version> {
        &self.version
    }

    #[must_use]
    pub(crate) fn size_compaction(&self) -> Option<Level> {
        self.size_compaction
    }

    #[must_use]
    pub(crate) fn needs_compaction(&self) -> bool {
        self.size_compaction.is_some()
    }
}

/// Versions that are no longer current but may still be held by a reader's snapshot. Tracked
/// as weak references so they disappear from this list on their own once the last strong
/// reference (the reader) drops; the `collection_counter` heuristic (grounded on the
/// observation that most old versions die quickly) avoids scanning on every publication.
pub(crate) struct OldVersions {
    old_versions:       Vec<Weak<Version>>,
    collection_counter: usize,
}

impl OldVersions {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self { old_versions: Vec::new(), collection_counter: 1 }
    }

    pub(crate) fn add_old_version(&mut self, version: Arc<Version>) {
        let weak = Arc::downgrade(&version);
        drop(version);
        if weak.upgrade().is_none() {
            // That was the only strong reference; nothing to track.
            return;
        }

        self.maybe_collect_garbage();
        self.old_versions.push(weak);
        if self.collection_counter % 2 == 0 {
            self.collection_counter += 1;
        }
    }

    /// Every file reachable from a version readers might still hold, for the live-files set
    /// used to decide what is safe to delete from disk.
    pub(crate) fn live(&mut self) -> impl Iterator<Item = Arc<Version>> {
        self.collect_garbage();
        self.old_versions.iter().filter_map(Weak::upgrade).collect::<Vec<_>>().into_iter()
    }

    fn maybe_collect_garbage(&mut self) {
        if let Some(decremented) = self.collection_counter.checked_sub(1) {
            self.collection_counter = decremented;
        } else {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        self.old_versions.retain(|weak| weak.strong_count() > 0);
        self.collection_counter = self.old_versions.len() / 2;
    }
}
