//! The global happens-before frontier (spec.md §3, §5): two handle → last
//! delivered-sequence maps, one for events/mutexes and one for critical
//! sections. Sequences are delivered strictly monotonically per handle,
//! starting at 1.

use crate::record::SyncKind;
use std::collections::HashMap;

#[derive(Default)]
pub struct SyncRegistry {
    event_mutex_seq: HashMap<u32, u32>,
    critsec_seq: HashMap<u32, u32>,
}

impl SyncRegistry {
    pub fn new() -> SyncRegistry {
        SyncRegistry::default()
    }

    fn map_for(&self, kind: SyncKind) -> &HashMap<u32, u32> {
        match kind {
            SyncKind::CritSec => &self.critsec_seq,
            SyncKind::Event | SyncKind::Mutex => &self.event_mutex_seq,
        }
    }

    fn map_for_mut(&mut self, kind: SyncKind) -> &mut HashMap<u32, u32> {
        match kind {
            SyncKind::CritSec => &mut self.critsec_seq,
            SyncKind::Event | SyncKind::Mutex => &mut self.event_mutex_seq,
        }
    }

    /// Current high-water mark for `handle` under `kind`, or 0 if nothing
    /// has been delivered for it yet.
    pub fn current(&self, kind: SyncKind, handle: u32) -> u32 {
        *self.map_for(kind).get(&handle).unwrap_or(&0)
    }

    /// If `seq` is exactly one past the registry's current value for
    /// `handle`, advances it and returns `true`. Otherwise leaves the
    /// registry untouched and returns `false` (the caller must suspend the
    /// waiting thread).
    pub fn try_advance(&mut self, kind: SyncKind, handle: u32, seq: u32) -> bool {
        let current = self.current(kind, handle);
        if current == seq.wrapping_sub(1) {
            self.map_for_mut(kind).insert(handle, seq);
            true
        } else {
            false
        }
    }

    pub fn event_mutex_entries(&self) -> impl Iterator<Item = (&u32, &u32)> {
        self.event_mutex_seq.iter()
    }

    pub fn critsec_entries(&self) -> impl Iterator<Item = (&u32, &u32)> {
        self.critsec_seq.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_succeeds_only_at_next_sequence() {
        let mut reg = SyncRegistry::new();
        assert_eq!(reg.current(SyncKind::Event, 5), 0);
        assert!(reg.try_advance(SyncKind::Event, 5, 1));
        assert_eq!(reg.current(SyncKind::Event, 5), 1);
        // seq 3 is not 1's successor; registry stays at 1.
        assert!(!reg.try_advance(SyncKind::Event, 5, 3));
        assert_eq!(reg.current(SyncKind::Event, 5), 1);
        assert!(reg.try_advance(SyncKind::Event, 5, 2));
        assert_eq!(reg.current(SyncKind::Event, 5), 2);
    }

    #[test]
    fn event_and_mutex_share_a_namespace_but_critsec_is_separate() {
        let mut reg = SyncRegistry::new();
        assert!(reg.try_advance(SyncKind::Event, 1, 1));
        assert_eq!(reg.current(SyncKind::Mutex, 1), 1);
        assert_eq!(reg.current(SyncKind::CritSec, 1), 0);
    }

    #[test]
    fn registry_values_are_monotonic_non_decreasing() {
        let mut reg = SyncRegistry::new();
        let mut last = 0;
        for seq in 1..=10 {
            assert!(reg.try_advance(SyncKind::Event, 9, seq));
            let now = reg.current(SyncKind::Event, 9);
            assert!(now >= last);
            last = now;
        }
    }
}
