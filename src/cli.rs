//! Command-line surface (SPEC_FULL.md §2.10), in the shape of the
//! teacher's `commands::rd_options` seam but collapsed to the single
//! command spec.md §6 describes: there are no subcommands here, just one
//! primary log path and a handful of display/snapshot options.

use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "bbreplay", about = "Replays an instrumented program's binary trace log.")]
pub struct Options {
    /// Primary trace log file, e.g. `run.0001`.
    #[structopt(parse(from_os_str))]
    pub primary_log: PathBuf,

    /// Symbol name to watch; any API call returning through a matching
    /// resolved symbol is dumped. May be repeated.
    #[structopt(long = "filter")]
    pub filter: Vec<String>,

    /// Log every basic-block-end event.
    #[structopt(long = "show-bb")]
    pub show_bb: bool,

    /// Log every completed library call.
    #[structopt(long = "show-libcall")]
    pub show_libcall: bool,

    /// Restore a symbol-table snapshot before replay begins.
    #[structopt(long = "snapshot", parse(from_os_str))]
    pub snapshot: Option<PathBuf>,

    /// Persist a symbol-table snapshot after replay completes.
    #[structopt(long = "save-snapshot", parse(from_os_str))]
    pub save_snapshot: Option<PathBuf>,

    /// Print the final per-thread summary as JSON instead of log lines.
    #[structopt(long = "json-summary")]
    pub json_summary: bool,

    /// Use the looser (AND) LIB_RET mismatch predicate instead of the
    /// default stricter OR reading (spec.md §9 open question).
    #[structopt(long = "compat-and-mismatch")]
    pub compat_and_mismatch: bool,
}
