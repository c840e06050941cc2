//! Shard identity, naming scheme and local directory layout.
//!
//! A shard is one (server, log type) pair. Everything a shard touches on
//! disk and every name it asks the remote host for is derived here.

use crate::config::{LogType, MirrorConfig, Server};
use chrono::{NaiveDateTime, Timelike};
use std::fmt;
use std::path::{Path, PathBuf};

pub const TEMP_SUFFIX: &str = ".tmp";
pub const GZIP_SUFFIX: &str = ".gz";

/// One (server, log type) unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub server: Server,
    pub log_type: LogType,
}

impl Shard {
    pub fn new(server: Server, log_type: LogType) -> Self {
        Self { server, log_type }
    }

    /// Glob the downloader hands to the remote `find`, e.g. `imp_log_V02*.log`
    pub fn remote_glob(&self, version: u32) -> String {
        format!("{}_log_V{:02}*.log", self.log_type.prefix, version)
    }

    /// Name prefix shared by every file of this shard for one hour,
    /// e.g. `click_imp_log_V02_ded5128_2016-05-09_21`
    pub fn hour_prefix(&self, version: u32, hour: NaiveDateTime) -> String {
        format!(
            "{}_log_V{:02}_{}_{}_{:02}",
            self.log_type.prefix,
            version,
            self.server.hostname(),
            hour.format("%Y-%m-%d"),
            hour.hour()
        )
    }

    pub fn paths(&self, archive_root: &Path) -> ShardPaths {
        ShardPaths {
            raw_dir: archive_root
                .join(format!("raw_{}", self.log_type.folder_suffix))
                .join(self.server.folder()),
            gzip_dir: archive_root
                .join(format!("gzip_{}", self.log_type.folder_suffix))
                .join(self.server.folder()),
        }
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server.name, self.log_type.folder_suffix)
    }
}

/// Every shard of the configuration, log type major
pub fn shards(config: &MirrorConfig) -> Vec<Shard> {
    config
        .log_types
        .iter()
        .flat_map(|log_type| {
            config
                .servers
                .iter()
                .map(move |server| Shard::new(server.clone(), log_type.clone()))
        })
        .collect()
}

/// Where a file sits in the local pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Neither a verified raw copy nor an archived copy exists
    Absent,
    /// Verified raw copy present, compressed copy missing
    Raw,
    /// Compressed copy present in the archive directory
    Archived,
}

/// Local directories of one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPaths {
    pub raw_dir: PathBuf,
    pub gzip_dir: PathBuf,
}

impl ShardPaths {
    pub fn raw_path(&self, name: &str) -> PathBuf {
        self.raw_dir.join(name)
    }

    pub fn temp_path(&self, name: &str) -> PathBuf {
        self.raw_dir.join(format!("{name}{TEMP_SUFFIX}"))
    }

    /// Compression output before it is moved into the archive
    pub fn staged_gzip_path(&self, name: &str) -> PathBuf {
        self.raw_dir.join(format!("{name}{GZIP_SUFFIX}"))
    }

    pub fn archived_path(&self, name: &str) -> PathBuf {
        self.gzip_dir.join(format!("{name}{GZIP_SUFFIX}"))
    }

    /// Recomputed from the filesystem on every call
    pub fn status(&self, name: &str) -> FileStatus {
        if self.archived_path(name).is_file() {
            FileStatus::Archived
        } else if self.raw_path(name).is_file() {
            FileStatus::Raw
        } else {
            FileStatus::Absent
        }
    }
}

/// Leftovers of an interrupted transfer or compression
pub fn is_stray_artifact(name: &str) -> bool {
    name.ends_with(GZIP_SUFFIX) || name.ends_with(TEMP_SUFFIX)
}

/// Expand a storage key template for one shard and hour
pub fn storage_prefix(template: &str, log_type: &LogType, hour: NaiveDateTime) -> String {
    template
        .replace("{suffix}", &log_type.folder_suffix)
        .replace("{year}", &hour.format("%Y").to_string())
        .replace("{month}", &hour.format("%m").to_string())
        .replace("{day}", &hour.format("%d").to_string())
        .replace("{hour}", &hour.format("%H").to_string())
}

/// Truncate to the start of the hour
pub fn hour_floor(at: NaiveDateTime) -> NaiveDateTime {
    at.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn clicks_shard() -> Shard {
        Shard::new(
            Server {
                name: "ded5128".to_string(),
                hostname: None,
                folder: Some("edge-28".to_string()),
            },
            LogType {
                prefix: "click_imp".to_string(),
                folder_suffix: "clicks".to_string(),
            },
        )
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 5, 9)
            .unwrap()
            .and_hms_opt(h, m, 17)
            .unwrap()
    }

    #[test]
    fn test_naming_scheme() {
        let shard = clicks_shard();
        assert_eq!(shard.remote_glob(2), "click_imp_log_V02*.log");
        assert_eq!(
            shard.hour_prefix(2, at(21, 0)),
            "click_imp_log_V02_ded5128_2016-05-09_21"
        );
        assert_eq!(
            shard.hour_prefix(2, at(3, 0)),
            "click_imp_log_V02_ded5128_2016-05-09_03"
        );
        assert_eq!(shard.to_string(), "ded5128/clicks");
    }

    #[test]
    fn test_directory_layout() {
        let paths = clicks_shard().paths(Path::new("/data/log"));
        assert_eq!(paths.raw_dir, PathBuf::from("/data/log/raw_clicks/edge-28"));
        assert_eq!(paths.gzip_dir, PathBuf::from("/data/log/gzip_clicks/edge-28"));
        assert_eq!(
            paths.temp_path("a.log"),
            PathBuf::from("/data/log/raw_clicks/edge-28/a.log.tmp")
        );
        assert_eq!(
            paths.archived_path("a.log"),
            PathBuf::from("/data/log/gzip_clicks/edge-28/a.log.gz")
        );
    }

    #[test]
    fn test_file_status_follows_filesystem() {
        let temp = TempDir::new().unwrap();
        let paths = clicks_shard().paths(temp.path());
        fs::create_dir_all(&paths.raw_dir).unwrap();
        fs::create_dir_all(&paths.gzip_dir).unwrap();

        assert_eq!(paths.status("a.log"), FileStatus::Absent);
        fs::write(paths.temp_path("a.log"), b"partial").unwrap();
        assert_eq!(paths.status("a.log"), FileStatus::Absent);
        fs::write(paths.raw_path("a.log"), b"line\n").unwrap();
        assert_eq!(paths.status("a.log"), FileStatus::Raw);
        fs::write(paths.archived_path("a.log"), b"gz").unwrap();
        assert_eq!(paths.status("a.log"), FileStatus::Archived);
    }

    #[test]
    fn test_storage_prefix_expansion() {
        let shard = clicks_shard();
        let prefix = storage_prefix("logs/{suffix}/{year}/{month}/{day}/{hour}/", &shard.log_type, at(7, 40));
        assert_eq!(prefix, "logs/clicks/2016/05/09/07/");
    }

    #[test]
    fn test_hour_floor() {
        assert_eq!(hour_floor(at(7, 40)), NaiveDate::from_ymd_opt(2016, 5, 9).unwrap().and_hms_opt(7, 0, 0).unwrap());
    }

    #[test]
    fn test_stray_artifacts() {
        assert!(is_stray_artifact("a.log.gz"));
        assert!(is_stray_artifact("a.log.tmp"));
        assert!(!is_stray_artifact("a.log"));
    }
}
