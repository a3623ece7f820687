//! Leveled file logging for conclave runs.
//!
//! - ERROR: a run or an operation aborted
//! - WARN: recoverable surprises (stale worktrees, failed steps, dropped events)
//! - INFO: run milestones (admissions, merges, consensus decisions)
//! - DEBUG: every git invocation and write decision
//! - TRACE: raw command output
//!
//! Nothing is written until a log file is installed with [`init`] or
//! [`init_at`], so library users and tests stay silent. The level comes from
//! `--debug`, `CONCLAVE_DEBUG=1`, or an explicit `CONCLAVE_LOG=<level>`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;

use crate::error::Error;

static LOG_FILE: RwLock<Option<PathBuf>> = RwLock::new(None);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(Error::Validation(format!("unknown log level: {}", other))),
        }
    }
}

/// Level implied by the `--debug` flag and the environment. An explicit
/// `CONCLAVE_LOG` wins over the debug switches.
fn level_from_env(debug: bool) -> LogLevel {
    if let Some(level) = std::env::var("CONCLAVE_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        return level;
    }
    let env_debug = std::env::var("CONCLAVE_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if debug || env_debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

/// Log to `~/.conclave/conclave.log`, truncating it.
pub fn init(debug: bool) {
    if let Some(dir) = dirs::home_dir().map(|h| h.join(".conclave")) {
        let _ = std::fs::create_dir_all(&dir);
        init_at(&dir.join("conclave.log"), level_from_env(debug));
    }
}

/// Log to `path` at `level`, truncating the file.
pub fn init_at(path: &Path, level: LogLevel) {
    let _ = std::fs::write(path, "");
    set_level(level);
    if let Ok(mut file) = LOG_FILE.write() {
        *file = Some(path.to_path_buf());
    }
}

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn enabled(level: LogLevel) -> bool {
    level <= self::level()
}

/// Append one timestamped line if `level` passes the filter and a file is
/// installed.
pub fn log_at(level: LogLevel, msg: &str) {
    if !enabled(level) {
        return;
    }
    let Ok(guard) = LOG_FILE.read() else {
        return;
    };
    let Some(path) = guard.as_ref() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
    }
}

#[macro_export]
macro_rules! clog {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_error {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_warn {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Skips formatting entirely when debug output is off.
#[macro_export]
macro_rules! clog_debug {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Debug) {
            $crate::log::log_at($crate::log::LogLevel::Debug, &format!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! clog_trace {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Trace) {
            $crate::log::log_at($crate::log::LogLevel::Trace, &format!($($arg)*))
        }
    };
}
