//! Event seam between the replay engine and its consumers (spec.md §2,
//! §4.8 of SPEC_FULL.md). The CSV tokenizer and flame-graph consumer are
//! out of scope per spec.md §1; this trait is the interface they'd sit
//! behind, plus the crate's own logging-based default implementation.

use crate::thread_state::ApiCallFrame;
use serde::Serialize;

/// Per-thread status line, as printed by `Summary` (spec.md §4.6) and the
/// original `LogRunner::Summary`/`thread_info_c::Dump`.
#[derive(Clone, Debug, Serialize)]
pub struct ThreadSummary {
    pub id: u32,
    pub running: bool,
    pub finished: bool,
    pub bb_count: u64,
    pub waiting_on: Option<WaitSummary>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WaitSummary {
    pub kind: &'static str,
    pub handle: u32,
    pub wanted_seq: u32,
    pub registry_seq: u32,
}

/// Consumer seam for replay events. All methods are no-ops by default so
/// a consumer only needs to implement what it cares about.
pub trait ReplayObserver {
    fn on_basic_block_end(&mut self, _thread_id: u32, _pc: u32) {}
    fn on_api_return(&mut self, _thread_id: u32, _call: &ApiCallFrame) {}
    fn on_api_call_dump(&mut self, _thread_id: u32, _call: &ApiCallFrame) {}
    fn on_thread_finished(&mut self, _summary: &ThreadSummary) {}
}

/// Default observer: logs every event instead of silently discarding it,
/// so the CLI has useful output with no flame-graph/CSV consumer wired
/// in.
#[derive(Default)]
pub struct LoggingObserver;

impl ReplayObserver for LoggingObserver {
    fn on_basic_block_end(&mut self, thread_id: u32, pc: u32) {
        log!(crate::log::LogDebug, "{}] bb {:#x}", thread_id, pc);
    }

    fn on_api_return(&mut self, thread_id: u32, call: &ApiCallFrame) {
        log!(
            crate::log::LogDebug,
            "{}] {} returned",
            thread_id,
            call.name.as_deref().unwrap_or("<unknown>")
        );
    }

    fn on_api_call_dump(&mut self, thread_id: u32, call: &ApiCallFrame) {
        log!(crate::log::LogInfo, "{}] {}", thread_id, dump_call(call));
    }

    fn on_thread_finished(&mut self, summary: &ThreadSummary) {
        log!(
            crate::log::LogInfo,
            "{}] thread finished. bb count: {}",
            summary.id,
            summary.bb_count
        );
    }
}

/// Renders an `ApiCallFrame` exactly the way `df_apicall_c::Dump()` did in
/// `original_source/parselog/logrunner.cpp`:
/// `call NAME@FUNC( arg, arg, "str", ... ) -> { arg, arg, "str", ... } => RET_ADDR`.
pub fn dump_call(call: &ApiCallFrame) -> String {
    let mut out = String::new();
    out.push_str("call ");
    out.push_str(call.name.as_deref().unwrap_or(""));
    out.push('@');
    out.push_str(&format!("{:x}", call.func));
    out.push_str("( ");
    for a in &call.call_args {
        out.push_str(&format!("{}, ", a));
    }
    for s in &call.call_strings {
        out.push_str(&format!("{}, ", String::from_utf8_lossy(s)));
    }
    out.push_str(") -> { ");
    for a in &call.ret_args {
        out.push_str(&format!("{}, ", a));
    }
    for s in &call.ret_strings {
        out.push_str(&format!("{}, ", String::from_utf8_lossy(s)));
    }
    out.push_str(&format!("}} => {:x}", call.ret_addr));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_call_matches_original_format() {
        let call = ApiCallFrame {
            func: 0x1000,
            ret_addr: 0x2000,
            name: Some("f".to_string()),
            call_args: vec![7],
            call_strings: vec![],
            ret_args: vec![42],
            ret_strings: vec![],
        };
        assert_eq!(dump_call(&call), "call f@1000( 7, ) -> { 42, } => 2000");
    }
}
