//! Per-thread execution state (spec.md §3). `current_api` is deliberately
//! an `Option<usize>` index into `api_stack`, not a pointer or reference
//! into it — the teacher's C++ ancestor keeps a raw pointer to the stack's
//! back element (`apicall_now`) that dangles across any push/pop; spec.md
//! §9 calls this out explicitly ("Current-frame back-reference") as a bug
//! to design away. Crucially, the index is tracked independently of the
//! stack's contents: it is armed only by a `LIB_CALL`/`LIB_RET` dispatch
//! and explicitly cleared by `api_call_ret`, exactly as the C++ nulls
//! `apicall_now` after `ApiCallRet` (logrunner.cpp:421). Deriving
//! "current" from `api_stack.last()` instead would make a still-open
//! outer frame look current again the instant an inner nested call's
//! frame is popped, misrouting the outer frame's own `LIB_RET`/`ARGS`/
//! `STRING` records.

use crate::record_source::RecordSource;

/// One in-flight (or completed-but-not-yet-retired) library call on a
/// thread's call stack.
#[derive(Clone, Debug, Default)]
pub struct ApiCallFrame {
    pub func: u32,
    pub ret_addr: u32,
    pub name: Option<String>,
    pub call_args: Vec<u32>,
    pub call_strings: Vec<Vec<u8>>,
    pub ret_args: Vec<u32>,
    pub ret_strings: Vec<Vec<u8>>,
}

/// Which sync primitive kind a thread is waiting on, if any. At most one
/// of these is populated at a time (spec.md §3 invariant).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WaitDescriptor {
    pub handle: u32,
    pub seq: u32,
}

impl WaitDescriptor {
    pub fn is_pending(&self) -> bool {
        self.handle != 0
    }

    pub fn clear(&mut self) {
        self.handle = 0;
        self.seq = 0;
    }
}

pub struct ThreadState {
    pub id: u32,
    pub running: bool,
    pub finished: bool,
    /// Tag of the last record consumed whose tag was neither ARGS nor
    /// STRING (spec.md §4.2 step 2d).
    pub last_tag: Option<u32>,
    /// Program counter of the basic block currently open, or `None`.
    pub within_bb: Option<u32>,
    pub bb_count: u64,
    pub file_position: u64,
    pub api_stack: Vec<ApiCallFrame>,
    /// Index of the "armed" frame in `api_stack`, or `None` if no call is
    /// currently current. Set by `arm_current_api`, cleared by
    /// `clear_current_api`; never derived from `api_stack.last()` alone.
    pub current_api: Option<usize>,
    pub wait_event: WaitDescriptor,
    pub wait_mutex: WaitDescriptor,
    pub wait_critsec: WaitDescriptor,
    pub source: RecordSource,
}

impl ThreadState {
    pub fn new(id: u32, source: RecordSource) -> ThreadState {
        ThreadState {
            id,
            running: true,
            finished: false,
            last_tag: None,
            within_bb: None,
            bb_count: 0,
            file_position: 0,
            api_stack: Vec::new(),
            current_api: None,
            wait_event: WaitDescriptor::default(),
            wait_mutex: WaitDescriptor::default(),
            wait_critsec: WaitDescriptor::default(),
            source,
        }
    }

    /// Arms `current_api` to the top of the stack, or clears it if the
    /// stack is empty. Called on `LIB_CALL` (after the push) and on
    /// `LIB_RET` dispatch (to re-arm a frame that a sibling inner call's
    /// return may have cleared in between).
    pub fn arm_current_api(&mut self) {
        self.current_api = if self.api_stack.is_empty() { None } else { Some(self.api_stack.len() - 1) };
    }

    pub fn clear_current_api(&mut self) {
        self.current_api = None;
    }

    pub fn current_api_mut(&mut self) -> Option<&mut ApiCallFrame> {
        let idx = self.current_api?;
        self.api_stack.get_mut(idx)
    }

    pub fn current_api(&self) -> Option<&ApiCallFrame> {
        let idx = self.current_api?;
        self.api_stack.get(idx)
    }

    /// Invariant check from spec.md §3: at most one wait descriptor may be
    /// pending, and `running == false` must imply exactly one is pending
    /// (unless the thread was simply created suspended and has not yet
    /// observed any SYNC record at all).
    pub fn pending_wait_count(&self) -> usize {
        [self.wait_event.is_pending(), self.wait_mutex.is_pending(), self.wait_critsec.is_pending()]
            .iter()
            .filter(|p| **p)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_thread_has_no_pending_waits() {
        let t = ThreadState::new(0, RecordSource::closed());
        assert_eq!(t.pending_wait_count(), 0);
        assert!(t.running);
        assert!(!t.finished);
    }

    #[test]
    fn current_api_tracks_armed_index_not_raw_stack_top() {
        let mut t = ThreadState::new(0, RecordSource::closed());
        t.api_stack.push(ApiCallFrame { func: 1, ..Default::default() });
        t.arm_current_api();
        assert_eq!(t.current_api().unwrap().func, 1);

        t.api_stack.push(ApiCallFrame { func: 2, ..Default::default() });
        t.arm_current_api();
        assert_eq!(t.current_api().unwrap().func, 2);

        // Clearing (as api_call_ret does) leaves current_api empty even
        // though an outer frame is still on the stack underneath.
        t.clear_current_api();
        assert!(t.current_api().is_none());
        t.api_stack.pop();
        assert!(t.current_api().is_none());

        // Re-arming re-targets the new top (the outer frame).
        t.arm_current_api();
        assert_eq!(t.current_api().unwrap().func, 1);
    }

    #[test]
    fn arm_current_api_on_empty_stack_clears_it() {
        let mut t = ThreadState::new(0, RecordSource::closed());
        t.arm_current_api();
        assert!(t.current_api().is_none());
    }
}
