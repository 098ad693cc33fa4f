//! API-Call Semantic Layer (spec.md §4.5): well-known API interpretations
//! that mutate `ThreadRegistry` state on API return. Argument positions
//! (`ret_args[1]` for a new/resumed thread id, `call_args[3] & 0x4` for
//! the create-suspended bit, `call_strings[0]`/`ret_args[0]` for
//! `CreateFileA`) are carried over bit-exact from
//! `original_source/parselog/logrunner.cpp`'s `OnCreateThread`/
//! `OnResumeThread`/`OnCreateFile`.

use crate::record_source::RecordSource;
use crate::thread_registry::ThreadRegistry;
use crate::thread_state::{ApiCallFrame, ThreadState};
use bitflags::bitflags;
use std::collections::HashMap;

bitflags! {
    /// Bit observed in a `CreateThread` call's fourth argument.
    pub struct ThreadCreateFlags: u32 {
        const CREATE_SUSPENDED = 0x4;
    }
}

/// Observational side table bound by `CreateFileA`/`CloseHandle`. Not
/// load-bearing for replay ordering (spec.md §4.5), kept only so a
/// consumer can ask "what file does handle H refer to".
#[derive(Default)]
pub struct FileTable {
    by_handle: HashMap<u32, String>,
}

impl FileTable {
    pub fn new() -> FileTable {
        FileTable::default()
    }

    pub fn path_for(&self, handle: u32) -> Option<&str> {
        self.by_handle.get(&handle).map(|s| s.as_str())
    }
}

/// Dispatches a completed API call to its well-known handler, if any.
/// `primary_path` is the primary trace file's path, used to derive a
/// sibling log file name for `CreateThread` (`<primary>.<decimal-id>`,
/// spec.md §4.5/§6).
pub fn on_api_return(
    call: &ApiCallFrame,
    thread_id: u32,
    primary_path: &str,
    threads: &mut ThreadRegistry,
    files: &mut FileTable,
) {
    match call.name.as_deref() {
        Some("CreateThread") => on_create_thread(call, primary_path, threads),
        Some("ResumeThread") => on_resume_thread(call, threads),
        Some("CreateFileA") => on_create_file(call, files),
        Some("CloseHandle") => on_close_handle(call, thread_id),
        _ => {}
    }
}

fn on_create_thread(call: &ApiCallFrame, primary_path: &str, threads: &mut ThreadRegistry) {
    let new_thread_id = match call.ret_args.get(1) {
        Some(id) => *id,
        None => return,
    };
    if new_thread_id == 0 {
        // CreateThread with child id 0 is ignored silently (spec.md §8).
        return;
    }
    if threads.contains(new_thread_id) {
        log!(crate::log::LogWarn, "already created with thread id {}?", new_thread_id);
        return;
    }

    let create_suspended = call
        .call_args
        .get(3)
        .map(|flags| ThreadCreateFlags::from_bits_truncate(*flags).contains(ThreadCreateFlags::CREATE_SUSPENDED))
        .unwrap_or(false);

    let sibling_path = format!("{}.{}", primary_path, new_thread_id);
    match RecordSource::open(&sibling_path) {
        Ok(source) => {
            let mut thread = ThreadState::new(new_thread_id, source);
            thread.running = !create_suspended;
            if thread.running {
                log!(crate::log::LogInfo, "{}] thread starting.", new_thread_id);
            } else {
                log!(crate::log::LogInfo, "{}] thread created.", new_thread_id);
            }
            threads.insert(thread);
        }
        Err(e) => {
            // Non-fatal: open failure for a sibling log discards the child
            // thread and the parent continues (spec.md §7, §8).
            log!(crate::log::LogWarn, "fail to open sibling log {}: {}", sibling_path, e);
        }
    }
}

fn on_resume_thread(call: &ApiCallFrame, threads: &mut ThreadRegistry) {
    let resume_thread_id = match call.ret_args.get(1) {
        Some(id) => *id,
        None => return,
    };
    if let Some(thread) = threads.get_mut(resume_thread_id) {
        thread.running = true;
        log!(crate::log::LogInfo, "{}] thread resuming.", resume_thread_id);
    }
}

fn on_create_file(call: &ApiCallFrame, files: &mut FileTable) {
    let (path, handle) = match (call.call_strings.get(0), call.ret_args.get(0)) {
        (Some(path), Some(handle)) => (String::from_utf8_lossy(path).to_string(), *handle),
        _ => return,
    };
    log!(crate::log::LogInfo, "file {} = {}", path, handle);
    files.by_handle.insert(handle, path);
}

fn on_close_handle(call: &ApiCallFrame, thread_id: u32) {
    if let Some(handle) = call.call_args.get(0) {
        log!(crate::log::LogDebug, "{}] close handle {}", thread_id, handle);
    }
}
