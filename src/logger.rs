//! Session logger: the `log` backend for RefStudio.
//!
//! Each launch truncates `refstudio.log` in the per-user data directory, so
//! the file only describes the latest session:
//!
//!   Windows:  `%APPDATA%\RefStudio\refstudio.log`
//!   Linux:    `$XDG_DATA_HOME/RefStudio/refstudio.log` (or `~/.local/share`)
//!   macOS:    `~/Library/Application Support/RefStudio/refstudio.log`
//!
//! Records go to stderr as well when running verbose, and always when the
//! file could not be opened.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};

const LOG_FILE_NAME: &str = "refstudio.log";

/// Open log file plus where it lives.
struct SessionFile {
    path: PathBuf,
    file: Mutex<File>,
}

struct SessionLogger {
    file: Option<SessionFile>,
    mirror_stderr: bool,
    level: LevelFilter,
}

static SESSION: OnceLock<SessionLogger> = OnceLock::new();

impl SessionLogger {
    /// Append one line.  False when there is no file to append to; write
    /// errors are dropped.
    fn append(&self, line: &str) -> bool {
        let Some(session) = &self.file else {
            return false;
        };
        match session.file.lock() {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", line);
                true
            }
            Err(_) => false,
        }
    }
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{:<5}] {}",
            clock(),
            record.level().as_str(),
            record.args()
        );
        if !self.append(&line) || self.mirror_stderr {
            eprintln!("{}", line);
        }
    }

    fn flush(&self) {
        if let Some(session) = &self.file
            && let Ok(mut file) = session.file.lock()
        {
            let _ = file.flush();
        }
    }
}

/// Install the session logger.  Only the first call has any effect.
///
/// `verbose` lowers the level to `Debug` and mirrors records to stderr.
/// A panic hook is chained in so panic messages also land in the file.
pub fn init(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let mut first = false;
    let session = SESSION.get_or_init(|| {
        first = true;
        SessionLogger {
            file: open_session_file(&data_dir().join("RefStudio").join(LOG_FILE_NAME)),
            mirror_stderr: verbose,
            level,
        }
    });
    if !first {
        return;
    }
    if log::set_logger(session).is_ok() {
        log::set_max_level(level);
    }

    if let Some(f) = &session.file {
        session.append(&format!("=== RefStudio session started (unix {}) ===", unix_secs().unwrap_or(0)));
        session.append(&format!("Writing to {}", f.path.display()));
        session.append("");
    }

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(s) = SESSION.get() {
            s.append(&format!("[{}] [PANIC] {}", clock(), info));
        }
        previous(info);
    }));
}

fn open_session_file(path: &Path) -> Option<SessionFile> {
    if let Some(dir) = path.parent() {
        let _ = fs::create_dir_all(dir);
    }
    let opened = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path);
    match opened {
        Ok(file) => Some(SessionFile {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        }),
        Err(e) => {
            eprintln!("refstudio: cannot open log file {}: {}", path.display(), e);
            None
        }
    }
}

/// Per-user data directory, without the application folder.
fn data_dir() -> PathBuf {
    let var = |name: &str| std::env::var_os(name).map(PathBuf::from);
    if cfg!(target_os = "windows") {
        if let Some(dir) = var("APPDATA") {
            return dir;
        }
    } else if cfg!(target_os = "macos") {
        if let Some(home) = var("HOME") {
            return home.join("Library").join("Application Support");
        }
    }
    var("XDG_DATA_HOME")
        .or_else(|| var("HOME").map(|h| h.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn unix_secs() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

/// UTC wall clock as HH:MM:SS.
fn clock() -> String {
    match unix_secs() {
        Some(secs) => {
            let day = secs % 86_400;
            format!("{:02}:{:02}:{:02}", day / 3600, day % 3600 / 60, day % 60)
        }
        None => "--:--:--".to_string(),
    }
}
