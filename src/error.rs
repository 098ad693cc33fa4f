//! Recoverable error conditions. Invariant violations that indicate a
//! corrupt trace (mismatched `LIB_RET`, `ARGS`/`STRING` with no matching
//! call, unknown record tag) are not represented here: those go through
//! `fatal!`/`ed_assert!` in `crate::log`, matching the teacher's treatment
//! of desynchronization from the trace as unrecoverable rather than a
//! `Result` to propagate. Failure to open a sibling thread's trace log is
//! also not represented here: it's non-fatal and discarded inline with a
//! `log!` warning at the call site (`api_semantics::on_create_thread`),
//! never surfaced as a `Result` the caller has to handle.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to open primary trace file {path}")]
    OpenPrimary { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReplayError>;
