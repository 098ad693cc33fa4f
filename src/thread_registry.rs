//! Ordered thread-id → `ThreadState` registry (spec.md §3). Per spec.md §9
//! ("Iteration cursor over a mutating mapping"), the round-robin cursor is
//! stored as a thread id — a stable key — rather than a container
//! iterator, so insertions (`CreateThread`) and removals (finalization)
//! mid-scan can't invalidate it.

use crate::thread_state::ThreadState;
use std::collections::BTreeMap;

pub struct ThreadRegistry {
    threads: BTreeMap<u32, ThreadState>,
    /// Id of the next thread to consider when scheduling. May name a
    /// thread that no longer exists (e.g. just finalized); `next_from`
    /// treats that as "start from the smallest id at or after this one".
    cursor: u32,
}

impl ThreadRegistry {
    pub fn new() -> ThreadRegistry {
        ThreadRegistry { threads: BTreeMap::new(), cursor: 0 }
    }

    pub fn insert(&mut self, thread: ThreadState) {
        self.threads.insert(thread.id, thread);
    }

    pub fn get(&self, id: u32) -> Option<&ThreadState> {
        self.threads.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut ThreadState> {
        self.threads.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.threads.contains_key(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<ThreadState> {
        self.threads.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.threads.keys().copied().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&u32, &mut ThreadState)> {
        self.threads.iter_mut()
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn set_cursor(&mut self, id: u32) {
        self.cursor = id;
    }

    /// The thread id the round-robin scan should start from: the smallest
    /// registered id greater than or equal to `cursor`, wrapping to the
    /// smallest registered id if none qualifies. Returns `None` if the
    /// registry is empty.
    pub fn next_from(&self, cursor: u32) -> Option<u32> {
        if self.threads.is_empty() {
            return None;
        }
        self.threads
            .range(cursor..)
            .next()
            .or_else(|| self.threads.iter().next())
            .map(|(id, _)| *id)
    }

    /// The registered id immediately following `id`, wrapping around.
    pub fn id_after(&self, id: u32) -> Option<u32> {
        if self.threads.is_empty() {
            return None;
        }
        self.threads
            .range(id.wrapping_add(1)..)
            .next()
            .or_else(|| self.threads.iter().next())
            .map(|(k, _)| *k)
    }
}
