//! Error types for the mirror pipeline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error type
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metrics endpoint answered {0}")]
    MetricsRejected(u16),

    #[error("Config error: {0}")]
    Config(String),

    /// An external command could not be spawned or exited non-zero.
    #[error("Command `{program}` failed: {message}")]
    Command { program: String, message: String },

    #[error("Checksum mismatch for {name}: remote {remote}, local {local}")]
    ChecksumMismatch {
        name: String,
        remote: String,
        local: String,
    },

    #[error("Malformed listing line: {0}")]
    MalformedListing(String),

    #[error("Another instance holds {} (pid {pid:?})", path.display())]
    AlreadyRunning { pid: Option<u32>, path: PathBuf },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl MirrorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MirrorError>;
