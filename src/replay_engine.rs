//! The cooperative scheduler (spec.md §4.2–§4.4, §4.6): round-robins over
//! threads, advances the chosen one by exactly one semantic unit per
//! `step`, and dispatches records to the handlers in §4.3. This is the
//! core the rest of the crate exists to feed and observe.

use crate::api_semantics::{self, FileTable};
use crate::error::{ReplayError, Result};
use crate::events::{ReplayObserver, ThreadSummary, WaitSummary};
use crate::flags::Flags;
use crate::record::{Record, SyncKind, TAG_ARGS, TAG_BB, TAG_LIB_CALL, TAG_LIB_RET, TAG_STRING};
use crate::record_source::RecordSource;
use crate::symbol_table::SymbolTable;
use crate::sync_registry::SyncRegistry;
use crate::thread_registry::ThreadRegistry;
use crate::thread_state::{ApiCallFrame, ThreadState, WaitDescriptor};

pub struct ReplayEngine {
    threads: ThreadRegistry,
    symbols: SymbolTable,
    sync: SyncRegistry,
    files: FileTable,
    primary_path: String,
    global_bb_count: u64,
}

impl ReplayEngine {
    /// Creates thread 0, opens its Record Source, marks it running, resets
    /// counters and the round-robin cursor (spec.md §4.2).
    pub fn open(primary_path: &str, filter_names: Vec<String>) -> Result<ReplayEngine> {
        let source = RecordSource::open(primary_path)
            .map_err(|_| ReplayError::OpenPrimary { path: primary_path.to_string() })?;
        let mut threads = ThreadRegistry::new();
        threads.insert(ThreadState::new(0, source));
        threads.set_cursor(0);
        Ok(ReplayEngine {
            threads,
            symbols: SymbolTable::new(filter_names),
            sync: SyncRegistry::new(),
            files: FileTable::new(),
            primary_path: primary_path.to_string(),
            global_bb_count: 0,
        })
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn sync(&self) -> &SyncRegistry {
        &self.sync
    }

    pub fn global_bb_count(&self) -> u64 {
        self.global_bb_count
    }

    pub fn thread_ids(&self) -> Vec<u32> {
        self.threads.ids()
    }

    /// Advances the replay by one semantic unit. Returns `false` when no
    /// thread is both non-finished and runnable (spec.md §4.2 step 1).
    pub fn step(&mut self, observer: &mut dyn ReplayObserver) -> bool {
        let chosen = match self.select_runnable_thread() {
            Some(id) => id,
            None => return false,
        };

        // Pulled out of the registry for the duration of the inner loop so
        // handlers that need `&mut ThreadRegistry` (CreateThread inserting
        // a sibling) don't conflict with this thread's own borrow.
        let mut thread = self.threads.remove(chosen).expect("selected thread must exist");
        self.drive_thread(&mut thread, observer);
        let next_cursor = self.threads.id_after(chosen).unwrap_or(chosen);
        self.threads.insert(thread);
        self.threads.set_cursor(next_cursor);
        true
    }

    /// Spec.md §4.2 step 1: scan at most N threads from the cursor, waking
    /// any that now qualify, and return the first one found running.
    fn select_runnable_thread(&mut self) -> Option<u32> {
        let n = self.threads.len();
        if n == 0 {
            return None;
        }
        let mut current = self.threads.next_from(self.threads.cursor())?;
        for _ in 0..n {
            let finished = self.threads.get(current).map(|t| t.finished).unwrap_or(true);
            if !finished {
                let running = self.threads.get(current).unwrap().running;
                if !running {
                    let thread = self.threads.get_mut(current).unwrap();
                    try_wake(thread, &mut self.sync);
                }
                if self.threads.get(current).unwrap().running {
                    return Some(current);
                }
            }
            current = self.threads.id_after(current)?;
        }
        None
    }

    /// Spec.md §4.2 step 2: the inner loop, run until a semantic unit has
    /// been delivered or the thread finalizes.
    fn drive_thread(&mut self, thread: &mut ThreadState, observer: &mut dyn ReplayObserver) {
        loop {
            // Mirrors the C++ ancestor's `while (thread_info.running)`
            // (logrunner.cpp:81): a SYNC dispatch that suspends the thread
            // (below) must stop the inner loop immediately, not keep
            // fetching records past the suspension point.
            if !thread.running {
                return;
            }

            // 2a: a completed LIB_RET, confirmed by lookahead.
            if thread.current_api().is_some() && thread.last_tag == Some(TAG_LIB_RET) {
                let next_tag = thread.source.peek();
                if next_tag != Some(TAG_ARGS) && next_tag != Some(TAG_STRING) {
                    self.api_call_ret(thread, observer);
                    return;
                }
            }

            // 2b: a basic block closed by the next record.
            if let Some(pc) = thread.within_bb {
                let next_tag = thread.source.peek();
                if next_tag == Some(TAG_BB) || next_tag == Some(TAG_LIB_CALL) {
                    thread.within_bb = None;
                    if Flags::get().show_bb {
                        log!(crate::log::LogDebug, "{}] bb end {:#x}", thread.id, pc);
                    }
                    observer.on_basic_block_end(thread.id, pc);
                    return;
                }
            }

            // 2c: fetch the next record, or finalize on EOF.
            let (record, offset) = match thread.source.fetch() {
                Some(v) => v,
                None => {
                    self.finalize_thread(thread, observer);
                    return;
                }
            };
            thread.file_position = offset;

            // 2d: dispatch, then update last_tag unless it's a continuation tag.
            let tag = record.tag();
            self.dispatch(thread, record);
            if tag != TAG_ARGS && tag != TAG_STRING {
                thread.last_tag = Some(tag);
            }
        }
    }

    fn dispatch(&mut self, thread: &mut ThreadState, record: Record) {
        match record {
            Record::Bb { pc } => {
                thread.within_bb = Some(pc);
                thread.bb_count += 1;
            }
            Record::Loop
            | Record::Read { .. }
            | Record::Write { .. }
            | Record::Exception { .. }
            | Record::Module { .. }
            | Record::WndProc { .. }
            | Record::AppCall
            | Record::AppRet => {
                // Reserved for analysis hooks; no semantic effect in the core.
            }
            Record::Symbol { func, name } => {
                self.symbols.register(func, String::from_utf8_lossy(&name).to_string());
            }
            Record::LibCall { func, ret_addr, arg } => {
                let name = self.symbols.lookup(func).map(|s| s.to_string());
                thread.api_stack.push(ApiCallFrame {
                    func,
                    ret_addr,
                    name,
                    call_args: vec![arg],
                    call_strings: Vec::new(),
                    ret_args: Vec::new(),
                    ret_strings: Vec::new(),
                });
                thread.arm_current_api();
            }
            Record::LibRet { func, ret_addr, retval } => {
                let thread_id = thread.id;
                // Re-arm to the stack top: a nested inner call's return may
                // have cleared `current_api` since this frame's LIB_CALL.
                thread.arm_current_api();
                let frame = thread
                    .current_api_mut()
                    .unwrap_or_else(|| fatal!("thread {}: LIB_RET with no open call frame", thread_id));
                let mismatch = if Flags::get().compat_and_mismatch {
                    frame.func != func && frame.ret_addr != ret_addr
                } else {
                    frame.func != func || frame.ret_addr != ret_addr
                };
                ed_assert!(
                    thread_id,
                    !mismatch,
                    "LIB_RET mismatch: frame=({:#x},{:#x}) record=({:#x},{:#x})",
                    frame.func,
                    frame.ret_addr,
                    func,
                    ret_addr
                );
                frame.ret_args.push(retval);
            }
            Record::Args { values } => {
                let thread_id = thread.id;
                let last_tag = thread.last_tag;
                let frame = thread
                    .current_api_mut()
                    .unwrap_or_else(|| fatal!("thread {}: ARGS with no open call frame", thread_id));
                match last_tag {
                    Some(TAG_LIB_CALL) => frame.call_args.extend_from_slice(&values),
                    Some(TAG_LIB_RET) => frame.ret_args.extend_from_slice(&values),
                    other => fatal!("thread {}: ARGS outside LIB_CALL/LIB_RET context (last_tag={:?})", thread_id, other),
                }
            }
            Record::String { bytes } => {
                let thread_id = thread.id;
                let last_tag = thread.last_tag;
                let frame = thread
                    .current_api_mut()
                    .unwrap_or_else(|| fatal!("thread {}: STRING with no open call frame", thread_id));
                match last_tag {
                    Some(TAG_LIB_CALL) => frame.call_strings.push(bytes),
                    Some(TAG_LIB_RET) => frame.ret_strings.push(bytes),
                    other => fatal!("thread {}: STRING outside LIB_CALL/LIB_RET context (last_tag={:?})", thread_id, other),
                }
            }
            Record::Sync { handle, seq, kind } => {
                if self.sync.try_advance(kind, handle, seq) {
                    // Sequence was already due; the thread keeps running.
                } else {
                    let wd = WaitDescriptor { handle, seq };
                    match kind {
                        SyncKind::Event => thread.wait_event = wd,
                        SyncKind::Mutex => thread.wait_mutex = wd,
                        SyncKind::CritSec => thread.wait_critsec = wd,
                    }
                    thread.running = false;
                }
            }
        }
    }

    /// Spec.md §4.3 "api_call_ret": pop the top frame, dispatch well-known
    /// names, and emit a call dump if the function address is filtered.
    /// Clears `current_api` unconditionally — matching the C++ ancestor's
    /// `apicall_now = nullptr` after every `ApiCallRet` — so a still-open
    /// outer frame left underneath isn't mistaken for current until its
    /// own `LIB_RET` re-arms it.
    fn api_call_ret(&mut self, thread: &mut ThreadState, observer: &mut dyn ReplayObserver) {
        let frame = match thread.api_stack.pop() {
            Some(f) => f,
            None => return,
        };
        thread.clear_current_api();
        if Flags::get().show_libcall {
            log!(crate::log::LogDebug, "{}] {}", thread.id, crate::events::dump_call(&frame));
        }
        observer.on_api_return(thread.id, &frame);
        api_semantics::on_api_return(&frame, thread.id, &self.primary_path, &mut self.threads, &mut self.files);
        if self.symbols.is_filtered(frame.func) {
            observer.on_api_call_dump(thread.id, &frame);
        }
    }

    /// Spec.md §4.6: synthesize deferred returns, close any open basic
    /// block, mark the thread finished, and fold its count into the global
    /// total.
    fn finalize_thread(&mut self, thread: &mut ThreadState, observer: &mut dyn ReplayObserver) {
        while !thread.api_stack.is_empty() {
            self.api_call_ret(thread, observer);
        }
        if let Some(pc) = thread.within_bb.take() {
            observer.on_basic_block_end(thread.id, pc);
        }
        thread.finished = true;
        thread.running = false;
        self.global_bb_count += thread.bb_count;
        log!(crate::log::LogInfo, "{}] thread finished. bb count: {}", thread.id, thread.bb_count);
        let summary = self.thread_summary(thread);
        observer.on_thread_finished(&summary);
    }

    /// Finalizes every still-non-finished thread (spec.md §4.6): the
    /// external entry point for user interrupt or premature primary EOF.
    pub fn summary(&mut self, observer: &mut dyn ReplayObserver) -> Vec<ThreadSummary> {
        let ids = self.threads.ids();
        for id in ids {
            let mut thread = match self.threads.remove(id) {
                Some(t) => t,
                None => continue,
            };
            if !thread.finished {
                self.finalize_thread(&mut thread, observer);
            }
            self.threads.insert(thread);
        }
        self.threads.ids().iter().map(|id| self.thread_summary(self.threads.get(*id).unwrap())).collect()
    }

    fn thread_summary(&self, thread: &ThreadState) -> ThreadSummary {
        let waiting_on = if thread.wait_critsec.is_pending() {
            Some(self.wait_summary("critsec", SyncKind::CritSec, thread.wait_critsec))
        } else if thread.wait_event.is_pending() {
            Some(self.wait_summary("event", SyncKind::Event, thread.wait_event))
        } else if thread.wait_mutex.is_pending() {
            Some(self.wait_summary("mutex", SyncKind::Mutex, thread.wait_mutex))
        } else {
            None
        };
        ThreadSummary {
            id: thread.id,
            running: thread.running,
            finished: thread.finished,
            bb_count: thread.bb_count,
            waiting_on,
        }
    }

    fn wait_summary(&self, kind: &'static str, sync_kind: SyncKind, wd: WaitDescriptor) -> WaitSummary {
        WaitSummary {
            kind,
            handle: wd.handle,
            wanted_seq: wd.seq,
            registry_seq: self.sync.current(sync_kind, wd.handle),
        }
    }
}

/// Spec.md §4.4: priority critsec → event → mutex; only one may be
/// pending, so this just picks whichever is set.
fn try_wake(thread: &mut ThreadState, sync: &mut SyncRegistry) -> bool {
    if thread.wait_critsec.is_pending() {
        return wake_if_due(&mut thread.wait_critsec, &mut thread.running, SyncKind::CritSec, sync);
    }
    if thread.wait_event.is_pending() {
        return wake_if_due(&mut thread.wait_event, &mut thread.running, SyncKind::Event, sync);
    }
    if thread.wait_mutex.is_pending() {
        return wake_if_due(&mut thread.wait_mutex, &mut thread.running, SyncKind::Mutex, sync);
    }
    false
}

fn wake_if_due(wd: &mut WaitDescriptor, running: &mut bool, kind: SyncKind, sync: &mut SyncRegistry) -> bool {
    if sync.try_advance(kind, wd.handle, wd.seq) {
        wd.clear();
        *running = true;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LoggingObserver;
    use crate::record::{TAG_ARGS, TAG_BB, TAG_LIB_CALL, TAG_LIB_RET, TAG_STRING, TAG_SYMBOL, TAG_SYNC};
    use std::fs::File;
    use std::io::Write;

    fn tmp_file(name: &str, bytes: &[u8]) -> String {
        let path = std::env::temp_dir().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path.to_string_lossy().to_string()
    }

    fn push_tag(out: &mut Vec<u8>, tag: u32) {
        out.extend_from_slice(&tag.to_le_bytes());
    }
    fn push_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_le_bytes());
    }
    fn push_bounded_name(out: &mut Vec<u8>, name: &[u8]) {
        let mut buf = [0u8; crate::record::NAME_LEN];
        buf[..name.len()].copy_from_slice(name);
        out.extend_from_slice(&buf);
    }

    fn symbol(out: &mut Vec<u8>, func: u32, name: &[u8]) {
        push_tag(out, TAG_SYMBOL);
        push_u32(out, func);
        push_bounded_name(out, name);
    }
    fn bb(out: &mut Vec<u8>, pc: u32) {
        push_tag(out, TAG_BB);
        push_u32(out, pc);
        push_u32(out, 0);
    }
    fn lib_call(out: &mut Vec<u8>, func: u32, ret_addr: u32, arg: u32) {
        push_tag(out, TAG_LIB_CALL);
        push_u32(out, func);
        push_u32(out, ret_addr);
        push_u32(out, arg);
    }
    fn lib_ret(out: &mut Vec<u8>, func: u32, ret_addr: u32, retval: u32) {
        push_tag(out, TAG_LIB_RET);
        push_u32(out, func);
        push_u32(out, ret_addr);
        push_u32(out, retval);
    }
    fn args(out: &mut Vec<u8>, a: u32, b: u32, c: u32) {
        push_tag(out, TAG_ARGS);
        push_u32(out, a);
        push_u32(out, b);
        push_u32(out, c);
    }
    fn string_rec(out: &mut Vec<u8>, s: &[u8]) {
        push_tag(out, TAG_STRING);
        push_bounded_name(out, s);
    }
    fn sync_rec(out: &mut Vec<u8>, handle: u32, seq: u32, kind: u32) {
        push_tag(out, TAG_SYNC);
        push_u32(out, handle);
        push_u32(out, seq);
        push_u32(out, kind);
    }

    #[derive(Default)]
    struct RecordingObserver {
        api_returns: Vec<(u32, ApiCallFrame)>,
        bb_ends: Vec<(u32, u32)>,
        finished: Vec<ThreadSummary>,
    }

    impl ReplayObserver for RecordingObserver {
        fn on_basic_block_end(&mut self, thread_id: u32, pc: u32) {
            self.bb_ends.push((thread_id, pc));
        }
        fn on_api_return(&mut self, thread_id: u32, call: &ApiCallFrame) {
            self.api_returns.push((thread_id, call.clone()));
        }
        fn on_thread_finished(&mut self, summary: &ThreadSummary) {
            self.finished.push(summary.clone());
        }
    }

    #[test]
    fn single_thread_straight_line() {
        let mut bytes = Vec::new();
        symbol(&mut bytes, 0x1000, b"f");
        bb(&mut bytes, 0x1000);
        lib_call(&mut bytes, 0x1000, 0x2000, 7);
        lib_ret(&mut bytes, 0x1000, 0x2000, 42);
        let path = tmp_file("bbreplay-engine-scenario1", &bytes);

        let mut engine = ReplayEngine::open(&path, vec![]).unwrap();
        let mut obs = RecordingObserver::default();
        while engine.step(&mut obs) {}
        engine.summary(&mut obs);

        assert_eq!(engine.global_bb_count(), 1);
        assert_eq!(obs.api_returns.len(), 1);
        let (tid, call) = &obs.api_returns[0];
        assert_eq!(*tid, 0);
        assert_eq!(call.name.as_deref(), Some("f"));
        assert_eq!(call.call_args, vec![7]);
        assert_eq!(call.ret_args, vec![42]);
    }

    #[test]
    fn args_and_string_continuation_accumulate_before_completion() {
        let mut bytes = Vec::new();
        lib_call(&mut bytes, 0xA, 0xB, 1);
        args(&mut bytes, 2, 3, 4);
        string_rec(&mut bytes, b"hello");
        lib_ret(&mut bytes, 0xA, 0xB, 9);
        args(&mut bytes, 10, 11, 12);
        bb(&mut bytes, 0x5);
        let path = tmp_file("bbreplay-engine-scenario2", &bytes);

        let mut engine = ReplayEngine::open(&path, vec![]).unwrap();
        let mut obs = RecordingObserver::default();
        while engine.step(&mut obs) {}
        engine.summary(&mut obs);

        let (_, call) = &obs.api_returns[0];
        assert_eq!(call.call_args, vec![1, 2, 3, 4]);
        assert_eq!(call.call_strings, vec![b"hello".to_vec()]);
        assert_eq!(call.ret_args, vec![9, 10, 11, 12]);
    }

    #[test]
    fn cross_thread_event_sync_gates_on_exact_next_sequence() {
        let mut t0 = Vec::new();
        bb(&mut t0, 0x1);
        sync_rec(&mut t0, 5, 1, 0);
        sync_rec(&mut t0, 5, 3, 0);
        bb(&mut t0, 0x2);
        let primary = tmp_file("bbreplay-engine-scenario3.0001", &t0);

        let mut t1 = Vec::new();
        sync_rec(&mut t1, 5, 2, 0);
        tmp_file("bbreplay-engine-scenario3.0001.1", &t1);
        // Thread 1 is exercised directly via ThreadState/SyncRegistry since
        // this scenario only needs thread 0 to have been created through
        // CreateThread for a full end-to-end run; here we drive the sync
        // registry directly to pin the ordering spec.md §8 describes.
        let mut engine = ReplayEngine::open(&primary, vec![]).unwrap();
        let mut obs = RecordingObserver::default();

        // The inner loop keeps fetching while the thread stays running, so
        // one step consumes BB, SYNC seq=1 (registry 0 -> 1, still running),
        // and SYNC seq=3 (not due, thread suspends) before returning.
        assert!(engine.step(&mut obs));
        assert_eq!(engine.sync().current(SyncKind::Event, 5), 1);
        // No other thread exists to advance the registry to 2 in this
        // fixture, so stepping further yields no runnable thread.
        assert!(!engine.step(&mut obs));
    }

    #[test]
    fn nested_lib_calls_do_not_pop_the_outer_frame_early() {
        let mut bytes = Vec::new();
        lib_call(&mut bytes, 0xA, 0x10, 1); // outer call A
        lib_call(&mut bytes, 0xB, 0x20, 2); // inner call B
        lib_ret(&mut bytes, 0xB, 0x20, 9); // B returns first
        lib_ret(&mut bytes, 0xA, 0x10, 99); // then A returns
        let path = tmp_file("bbreplay-engine-nested-calls", &bytes);

        let mut engine = ReplayEngine::open(&path, vec![]).unwrap();
        let mut obs = RecordingObserver::default();
        while engine.step(&mut obs) {}
        engine.summary(&mut obs);

        assert_eq!(obs.api_returns.len(), 2);
        let (_, inner) = &obs.api_returns[0];
        assert_eq!(inner.func, 0xB);
        assert_eq!(inner.ret_args, vec![9]);
        let (_, outer) = &obs.api_returns[1];
        assert_eq!(outer.func, 0xA);
        assert_eq!(outer.ret_args, vec![99]);
    }

    #[test]
    fn mismatched_lib_ret_is_fatal() {
        // Exercised for documentation: asserting the fatal path directly
        // would abort the test process, so this only pins the predicate
        // (spec.md §9's open question) via the flags default.
        assert!(!Flags::get().compat_and_mismatch);
    }

    #[test]
    fn thread_finalization_balances_the_api_stack() {
        let mut bytes = Vec::new();
        lib_call(&mut bytes, 0x1, 0x2, 0);
        // no LIB_RET: stream ends with an open call frame.
        let path = tmp_file("bbreplay-engine-scenario-finalize", &bytes);

        let mut engine = ReplayEngine::open(&path, vec![]).unwrap();
        let mut obs = RecordingObserver::default();
        while engine.step(&mut obs) {}
        engine.summary(&mut obs);

        assert_eq!(obs.api_returns.len(), 1);
        assert_eq!(obs.finished.len(), 1);
        assert!(obs.finished[0].finished);
    }

    #[test]
    fn empty_primary_file_finalizes_on_the_first_step() {
        let path = tmp_file("bbreplay-engine-empty", &[]);
        let mut engine = ReplayEngine::open(&path, vec![]).unwrap();
        let mut obs = LoggingObserver::default();
        // The first step immediately hits EOF and finalizes thread 0 (spec.md
        // §8: "Summary produces zero-thread totals"); with thread 0 now
        // finished, the next step call has nothing left to schedule.
        assert!(engine.step(&mut obs));
        assert!(!engine.step(&mut obs));
        let summaries = engine.summary(&mut obs);
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].finished);
        assert_eq!(summaries[0].bb_count, 0);
    }
}
