//! Configuration for the mirror pipeline
//!
//! Loaded once at process start from a TOML file; the rest of the crate only
//! ever sees it by shared reference.

use crate::error::{MirrorError, Result};
use crate::window::MAX_WINDOW_HOURS;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Directory for the rolling process logs
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Version tag embedded in log file names (`..._log_V02_...`)
    #[serde(default = "default_version")]
    pub version: u32,

    pub servers: Vec<Server>,

    pub log_types: Vec<LogType>,

    pub remote: RemoteConfig,

    pub archive: ArchiveConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    pub check: CheckConfig,

    /// Object-storage inventory; the upload check is skipped without it
    #[serde(default)]
    pub storage: Option<StorageConfig>,

    /// Metrics endpoint; gap counts are only logged without it
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,

    #[serde(default)]
    pub alerts: AlertConfig,
}

/// A remote host shipping logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Short host name, used to build the ssh address and to tag alerts
    pub name: String,

    /// Host name as it appears inside log file names (defaults to `name`)
    #[serde(default)]
    pub hostname: Option<String>,

    /// Local sub-directory for this server's files (defaults to `name`)
    #[serde(default)]
    pub folder: Option<String>,
}

impl Server {
    pub fn hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.name)
    }

    pub fn folder(&self) -> &str {
        self.folder.as_deref().unwrap_or(&self.name)
    }
}

/// A family of log files (impressions, clicks, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogType {
    /// File name prefix, e.g. `imp` for `imp_log_V02_...`
    pub prefix: String,

    /// Suffix of the local and storage folders, e.g. `impressions`
    pub folder_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub user: String,

    /// Domain appended to server names: `<user>@<name>.<domain>`
    pub domain: String,

    /// Directory holding the rotating logs on every server
    pub log_folder: String,

    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,

    #[serde(default = "default_scp_program")]
    pub scp_program: String,
}

impl RemoteConfig {
    pub fn host_for(&self, server: &Server) -> String {
        format!("{}@{}.{}", self.user, server.name, self.domain)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Root of `raw_<suffix>/<folder>` and `gzip_<suffix>/<folder>`
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Upper bound of the scan window, in hours before now
    #[serde(default = "default_max_hour")]
    pub max_hour: u32,

    /// Files found in bucket 0 above this count widen the next window
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: usize,

    /// Sleep after a pass that found nothing
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_secs: u64,

    /// PID lock guarding against a second downloader
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_hour: default_max_hour(),
            burst_threshold: default_burst_threshold(),
            idle_backoff_secs: default_idle_backoff(),
            lock_file: default_lock_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Where each collected listing is written as an audit trail
    pub output_dir: PathBuf,

    /// Hours before the base hour for the silent bookkeeping check
    #[serde(default = "default_silent_offset")]
    pub silent_offset_hours: u32,

    /// Hours before the base hour for the alerting check
    #[serde(default = "default_alert_offset")]
    pub alert_offset_hours: u32,

    /// Hours before the base hour for the storage inventory check
    #[serde(default = "default_upload_lag")]
    pub upload_lag_hours: u32,

    /// Signal the running downloader when local gaps are found
    #[serde(default)]
    pub restart_downloader_on_gap: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,

    /// Key prefix template with `{suffix}`, `{year}`, `{month}`, `{day}`, `{hour}`
    pub path_template: String,

    #[serde(default = "default_aws_program")]
    pub aws_program: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// InfluxDB write endpoint (line protocol)
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Mail recipients; alerts are only logged when empty
    #[serde(default)]
    pub recipients: Vec<String>,

    #[serde(default = "default_mail_program")]
    pub mail_program: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            mail_program: default_mail_program(),
        }
    }
}

const TEMPLATE_PLACEHOLDERS: [&str; 5] = ["suffix", "year", "month", "day", "hour"];

fn default_version() -> u32 {
    2
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_scp_program() -> String {
    "scp".to_string()
}

fn default_max_hour() -> u32 {
    48
}

fn default_burst_threshold() -> usize {
    20
}

fn default_idle_backoff() -> u64 {
    5
}

fn default_lock_file() -> PathBuf {
    if let Ok(home) = std::env::var("LOGMIRROR_HOME") {
        return PathBuf::from(home).join("download.pid");
    }
    dirs::home_dir()
        .map(|h| h.join(".logmirror").join("download.pid"))
        .unwrap_or_else(|| PathBuf::from("logmirror-download.pid"))
}

fn default_silent_offset() -> u32 {
    0
}

fn default_alert_offset() -> u32 {
    1
}

fn default_upload_lag() -> u32 {
    48
}

fn default_aws_program() -> String {
    "aws".to_string()
}

fn default_mail_program() -> String {
    "mail".to_string()
}

impl MirrorConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: MirrorConfig =
            toml::from_str(content).map_err(|e| MirrorError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(MirrorError::config("no servers configured"));
        }
        if self.log_types.is_empty() {
            return Err(MirrorError::config("no log types configured"));
        }
        if self.download.max_hour == 0 || self.download.max_hour > MAX_WINDOW_HOURS {
            return Err(MirrorError::config(format!(
                "download.max_hour must be between 1 and {}",
                MAX_WINDOW_HOURS
            )));
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(MirrorError::config("server with empty name"));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(MirrorError::config(format!(
                    "duplicate server '{}'",
                    server.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for log_type in &self.log_types {
            if log_type.prefix.is_empty() || log_type.folder_suffix.is_empty() {
                return Err(MirrorError::config(
                    "log type needs both prefix and folder_suffix",
                ));
            }
            if !seen.insert(log_type.prefix.as_str()) {
                return Err(MirrorError::config(format!(
                    "duplicate log type prefix '{}'",
                    log_type.prefix
                )));
            }
        }

        if let Some(storage) = &self.storage {
            validate_template(&storage.path_template)?;
        }

        Ok(())
    }
}

fn validate_template(template: &str) -> Result<()> {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            MirrorError::config(format!("unclosed placeholder in '{}'", template))
        })?;
        let name = &after[..close];
        if !TEMPLATE_PLACEHOLDERS.contains(&name) {
            return Err(MirrorError::config(format!(
                "unknown placeholder '{{{}}}' in '{}'",
                name, template
            )));
        }
        rest = &after[close + 1..];
    }
    Ok(())
}
