//! Small home-grown logging module, in the style of the rr/rd family of
//! tools: a global sink behind a `Mutex`, per-module level overrides, and
//! `log!`/`fatal!` macros that look like `write!` but also know the
//! calling file/line/module.

use backtrace::Backtrace;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Result, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::MutexGuard;

#[derive(Clone)]
struct LogModule {
    name: String,
    level: LogLevel,
}

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

struct LogGlobals {
    level_map: HashMap<String, LogLevel>,
    log_modules_cache: HashMap<String, LogModule>,
    log_file: Box<dyn Write + Send>,
    default_level: LogLevel,
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = {
        let maybe_filename = option_env!("BBREPLAY_LOG_FILE");
        let maybe_append_filename = option_env!("BBREPLAY_APPEND_LOG_FILE");
        let mut f: Box<dyn Write + Send>;
        if let Some(filename) = maybe_filename {
            f = Box::new(File::create(filename).unwrap());
        } else if let Some(append_filename) = maybe_append_filename {
            f = Box::new(
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(append_filename)
                    .unwrap(),
            );
        } else {
            f = Box::new(io::stderr());
        }

        if let Some(buf_size) = option_env!("BBREPLAY_LOG_BUFFER") {
            let log_buffer_size = buf_size.parse::<usize>().unwrap();
            f = Box::new(BufWriter::with_capacity(log_buffer_size, f));
        }

        let default_level = match option_env!("BBREPLAY_LOG_LEVEL") {
            Some("debug") => LogDebug,
            Some("info") => LogInfo,
            Some("warn") => LogWarn,
            Some("error") => LogError,
            _ => LogInfo,
        };

        Mutex::new(LogGlobals {
            level_map: HashMap::new(),
            log_modules_cache: HashMap::new(),
            log_file: f,
            default_level,
        })
    };
}

pub fn set_all_logging(level: LogLevel) {
    let mut l = LOG_GLOBALS.lock().unwrap();
    l.default_level = level;
    l.level_map.clear();
    l.log_modules_cache.clear();
}

fn get_log_level(module_name: &str, l: &MutexGuard<LogGlobals>) -> LogLevel {
    match l.level_map.get(module_name) {
        Some(level) => *level,
        None => l.default_level,
    }
}

fn filename_to_module_name(filename: &str) -> String {
    let path = Path::new(filename);
    path.file_stem().unwrap().to_string_lossy().to_string()
}

fn get_log_module(filename: &str, l: &mut MutexGuard<LogGlobals>) -> LogModule {
    if let Some(m) = l.log_modules_cache.get(filename) {
        return m.clone();
    }
    let name = filename_to_module_name(filename);
    let level = get_log_level(&name, l);
    let m = LogModule { name, level };
    l.log_modules_cache.insert(filename.to_owned(), m.clone());
    m
}

fn log_name(level: LogLevel) -> &'static str {
    match level {
        LogFatal => "FATAL",
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

pub struct NewLineTerminatingOstream {
    enabled: bool,
    message: Vec<u8>,
    lock: MutexGuard<'static, LogGlobals>,
}

impl NewLineTerminatingOstream {
    fn new(level: LogLevel, filename: &str, line: u32, func_name: &str) -> NewLineTerminatingOstream {
        let mut lock = LOG_GLOBALS.lock().unwrap();
        let m = get_log_module(filename, &mut lock);
        let enabled = level == LogFatal || level <= m.level;
        let mut this = NewLineTerminatingOstream {
            message: Vec::new(),
            enabled,
            lock,
        };
        if enabled {
            write_prefix(&mut this, level, &m.name, filename, line, func_name);
        }
        this
    }
}

fn write_prefix(
    stream: &mut dyn Write,
    level: LogLevel,
    module_name: &str,
    filename: &str,
    line: u32,
    func_name: &str,
) {
    write!(stream, "[{}] ", log_name(level)).unwrap();
    if level <= LogWarn {
        write!(stream, "{}:{} ", filename, line).unwrap();
    } else {
        write!(stream, "[{}] ", module_name).unwrap();
    }
    write!(stream, "{}() ", func_name).unwrap();
}

impl Drop for NewLineTerminatingOstream {
    fn drop(&mut self) {
        if self.enabled {
            let _ = self.write(b"\n");
            let _ = self.flush();
        }
    }
}

impl Write for NewLineTerminatingOstream {
    fn flush(&mut self) -> Result<()> {
        if !self.message.is_empty() && self.enabled {
            self.lock.log_file.write_all(&self.message)?;
            self.lock.log_file.flush()?;
        }
        self.message.clear();
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.enabled {
            self.message.extend_from_slice(buf);
        }
        Ok(buf.len())
    }
}

pub fn log(level: LogLevel, filename: &str, line: u32, func_name: &str) -> NewLineTerminatingOstream {
    NewLineTerminatingOstream::new(level, filename, line, func_name)
}

pub fn notifying_abort(bt: Backtrace) -> ! {
    eprintln!("=== Start bbreplay backtrace:");
    eprintln!("{:?}", bt);
    eprintln!("=== End bbreplay backtrace");
    std::process::abort();
}

/// Write a log line at the given level: `log!(LogDebug, "x={}", x)`.
macro_rules! log {
    ($log_level:expr, $($args:tt)*) => {{
        use std::io::Write;
        let mut stream = crate::log::log(
            $log_level,
            file!(),
            line!(),
            module_path!(),
        );
        write!(stream, $($args)*).unwrap();
    }};
}

/// Log a fatal-level message and abort the process. Used for conditions
/// that mean the trace stream is corrupt or internally inconsistent.
macro_rules! fatal {
    ($($args:tt)+) => {{
        {
            use std::io::Write;
            let mut stream = crate::log::log(
                crate::log::LogLevel::LogFatal,
                file!(),
                line!(),
                module_path!(),
            );
            write!(stream, $($args)+).unwrap();
        }
        crate::log::notifying_abort(backtrace::Backtrace::new());
    }};
}

/// Assert a condition about a thread's replay state, fatal on failure.
/// `ed_assert!(thread_id, cond)` or `ed_assert!(thread_id, cond, "msg", args...)`.
macro_rules! ed_assert {
    ($thread_id:expr, $cond:expr) => {
        if !$cond {
            fatal!("thread {}: assertion failed: {}", $thread_id, stringify!($cond));
        }
    };
    ($thread_id:expr, $cond:expr, $($args:tt)+) => {
        if !$cond {
            fatal!("thread {}: {}", $thread_id, format!($($args)+));
        }
    };
}
