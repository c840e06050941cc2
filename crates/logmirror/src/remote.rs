//! Remote host access: directory scan, transfer and checksums.
//!
//! `SshRemote` shells out to `ssh`/`scp`; tests substitute in-memory hosts
//! through the [`RemoteHost`] trait.

use crate::error::{MirrorError, Result};
use crate::exec;
use crate::listing::{first_checksum, parse_checksum_lines, Listing};
use crate::window::AgeBand;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// Absolute paths under `dir` matching `glob` whose age lies inside `band`
    async fn find(&self, host: &str, dir: &str, glob: &str, band: AgeBand) -> Result<Vec<String>>;

    /// Copy one remote file to `local`
    async fn fetch(&self, host: &str, remote_path: &str, local: &Path) -> Result<()>;

    /// Checksum of one remote file
    async fn checksum(&self, host: &str, remote_path: &str) -> Result<String>;

    /// Checksums of every file in `dir` whose name starts with `prefix`
    async fn list_checksums(&self, host: &str, dir: &str, prefix: &str) -> Result<Listing>;
}

#[derive(Debug, Clone)]
pub struct SshRemote {
    ssh_program: String,
    scp_program: String,
}

impl SshRemote {
    pub fn new(ssh_program: impl Into<String>, scp_program: impl Into<String>) -> Self {
        Self {
            ssh_program: ssh_program.into(),
            scp_program: scp_program.into(),
        }
    }

    async fn ssh(&self, host: &str, remote_command: String) -> Result<String> {
        let args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            host.to_string(),
            remote_command,
        ];
        exec::capture(&self.ssh_program, &args).await
    }
}

#[async_trait]
impl RemoteHost for SshRemote {
    async fn find(&self, host: &str, dir: &str, glob: &str, band: AgeBand) -> Result<Vec<String>> {
        let output = self.ssh(host, find_command(dir, glob, band)).await?;
        Ok(parse_find_output(&output))
    }

    async fn fetch(&self, host: &str, remote_path: &str, local: &Path) -> Result<()> {
        let args = vec![
            "-q".to_string(),
            "-B".to_string(),
            format!("{}:{}", host, remote_path),
            local.to_string_lossy().into_owned(),
        ];
        exec::capture(&self.scp_program, &args).await?;
        Ok(())
    }

    async fn checksum(&self, host: &str, remote_path: &str) -> Result<String> {
        let output = self
            .ssh(host, format!("md5sum {}", shell_quote(remote_path)))
            .await?;
        first_checksum(&output).ok_or_else(|| {
            MirrorError::MalformedListing(format!("empty md5sum output for {}", remote_path))
        })
    }

    async fn list_checksums(&self, host: &str, dir: &str, prefix: &str) -> Result<Listing> {
        let output = self.ssh(host, list_command(dir, prefix)).await?;
        Ok(parse_checksum_lines(&output))
    }
}

pub(crate) fn find_command(dir: &str, glob: &str, band: AgeBand) -> String {
    format!(
        "find {} -name {} -mmin +{} -mmin -{}",
        shell_quote(dir),
        shell_quote(glob),
        band.min_minutes,
        band.max_minutes
    )
}

pub(crate) fn list_command(dir: &str, prefix: &str) -> String {
    format!(
        "cd {} && for f in {}*; do if [ -f \"$f\" ]; then md5sum \"$f\"; fi; done",
        shell_quote(dir),
        shell_quote(prefix)
    )
}

pub(crate) fn parse_find_output(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Single-quote for a POSIX shell
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
