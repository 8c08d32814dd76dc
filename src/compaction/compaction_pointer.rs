use std::fmt::{self, Debug, Formatter};

use crate::format::{EntryType, InternalKey, SequenceNumber, UserKey};

/// Where a round-robin-style compaction last left off for one level, so the next pick in
/// that level resumes rather than restarting from the smallest key. Unset until the
/// first compaction from that level completes.
pub struct OptionalCompactionPointer {
    valid:           bool,
    user_key:        Vec<u8>,
    sequence_number: SequenceNumber,
    entry_type:      EntryType,
}

impl OptionalCompactionPointer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            valid:           false,
            user_key:        Vec::new(),
            sequence_number: SequenceNumber::ZERO,
            entry_type:      EntryType::MIN_TYPE,
        }
    }

    pub fn set(&mut self, key: InternalKey<'_>) {
        self.user_key.clear();
        self.user_key.extend_from_slice(key.user_key.0);
        self.sequence_number = key.sequence_number;
        self.entry_type      = key.entry_type;
        self.valid           = true;
    }

    #[must_use]
    pub fn internal_key(&self) -> Option<InternalKey<'_>> {
        self.valid.then_some(InternalKey {
            user_key:        UserKey(&self.user_key),
            sequence_number: self.sequence_number,
            entry_type:      self.entry_type,
        })
    }
}

impl Default for OptionalCompactionPointer {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for OptionalCompactionPointer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.internal_key(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pointer_is_unset() {
        let pointer = OptionalCompactionPointer::new();
        assert!(pointer.internal_key().is_none());
    }

    #[test]
    fn set_pointer_round_trips_the_key() {
        let mut pointer = OptionalCompactionPointer::new();
        let key = InternalKey::new(UserKey(b"m"), SequenceNumber(7), EntryType::Value);
        pointer.set(key);

        let stored = pointer.internal_key().expect("pointer was just set");
        assert_eq!(stored.user_key.0, b"m");
        assert_eq!(stored.sequence_number, SequenceNumber(7));
    }

    #[test]
    fn set_overwrites_a_previous_value() {
        let mut pointer = OptionalCompactionPointer::new();
        pointer.set(InternalKey::new(UserKey(b"a"), SequenceNumber(1), EntryType::Value));
        pointer.set(InternalKey::new(UserKey(b"z"), SequenceNumber(2), EntryType::Value));

        assert_eq!(pointer.internal_key().unwrap().user_key.0, b"z");
    }
}
