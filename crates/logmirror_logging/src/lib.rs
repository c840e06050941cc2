//! Shared logging setup for logmirror binaries.
//!
//! Every process writes to `<log_dir>/<app>.log` through a size-rotating
//! appender and mirrors the same events to stderr.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "logmirror=info";
pub const MAX_LOG_FILES: usize = 10;
pub const MAX_LOG_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Logging configuration shared by logmirror binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Directory for rolling log files. Falls back to `~/.logmirror/logs`.
    pub log_dir: Option<&'a Path>,
    pub verbose: bool,
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_logs_dir(),
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;
    let file_writer = SizeRotatingFile::open(
        &log_dir,
        config.app_name,
        MAX_LOG_FILES,
        MAX_LOG_FILE_SIZE,
    )
    .with_context(|| format!("Failed to open log file for {}", config.app_name))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.verbose {
        EnvFilter::new("logmirror=debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file_writer))
                .with_ansi(false)
                .with_thread_names(true)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Default logs directory: ~/.logmirror/logs (or $LOGMIRROR_HOME/logs)
pub fn default_logs_dir() -> PathBuf {
    if let Ok(override_path) = std::env::var("LOGMIRROR_HOME") {
        return PathBuf::from(override_path).join("logs");
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".logmirror")
        .join("logs")
}

/// `<app>.log` plus numbered backups `<app>.log.1` (newest) up to
/// `<app>.log.<keep - 1>`; a write that would push the live file past
/// `max_size` moves everything up one slot first.
struct SizeRotatingFile {
    live: PathBuf,
    keep: usize,
    max_size: u64,
    file: File,
    written: u64,
}

impl SizeRotatingFile {
    fn open(dir: &Path, app_name: &str, keep: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let live = dir.join(format!("{}.log", sanitize_name(app_name)));
        let file = append_to(&live)?;
        let written = file.metadata()?.len();
        Ok(Self {
            live,
            keep: keep.max(1),
            max_size,
            file,
            written,
        })
    }

    fn backup(&self, slot: usize) -> PathBuf {
        let mut name = self.live.clone().into_os_string();
        name.push(format!(".{slot}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for slot in (1..self.keep).rev() {
            let from = if slot == 1 { self.live.clone() } else { self.backup(slot - 1) };
            match fs::rename(&from, self.backup(slot)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        if self.keep == 1 {
            fs::remove_file(&self.live)?;
        }
        self.file = append_to(&self.live)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeRotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn append_to(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
