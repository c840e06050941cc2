//! In-memory remote hosts.

use async_trait::async_trait;
use globset::GlobBuilder;
use logmirror::listing::file_name;
use logmirror::{AgeBand, Listing, MirrorError, RemoteHost, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct RemoteFile {
    content: Vec<u8>,
    age_minutes: u32,
}

/// Remote log folders keyed by host.
///
/// Every host has a single log folder; the `dir` argument only shapes the
/// returned paths.
#[derive(Default)]
pub struct FakeRemote {
    hosts: Mutex<BTreeMap<String, BTreeMap<String, RemoteFile>>>,
    unreachable: Mutex<HashSet<String>>,
    corrupt: Mutex<HashSet<String>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, host: &str, name: &str, content: &[u8], age_minutes: u32) {
        lock(&self.hosts).entry(host.to_string()).or_default().insert(
            name.to_string(),
            RemoteFile {
                content: content.to_vec(),
                age_minutes,
            },
        );
    }

    /// Every call against `host` fails from now on
    pub fn set_unreachable(&self, host: &str) {
        lock(&self.unreachable).insert(host.to_string());
    }

    /// Transfers of `name` deliver different bytes than the remote checksum
    pub fn corrupt_transfers_of(&self, name: &str) {
        lock(&self.corrupt).insert(name.to_string());
    }

    /// File names fetched so far, in call order
    pub fn fetched(&self) -> Vec<String> {
        lock(&self.fetched).clone()
    }

    fn reachable(&self, host: &str) -> Result<()> {
        if lock(&self.unreachable).contains(host) {
            return Err(MirrorError::command("ssh", format!("{host}: connection refused")));
        }
        Ok(())
    }

    fn file(&self, host: &str, remote_path: &str) -> Result<RemoteFile> {
        self.reachable(host)?;
        lock(&self.hosts)
            .get(host)
            .and_then(|files| files.get(file_name(remote_path)))
            .cloned()
            .ok_or_else(|| MirrorError::command("ssh", format!("{remote_path}: No such file")))
    }
}

#[async_trait]
impl RemoteHost for FakeRemote {
    async fn find(&self, host: &str, dir: &str, glob: &str, band: AgeBand) -> Result<Vec<String>> {
        self.reachable(host)?;
        // Same semantics as `find -name`: the glob applies to the file name
        let matcher = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()
            .map_err(|e| MirrorError::command("find", format!("bad glob '{glob}': {e}")))?
            .compile_matcher();
        let hosts = lock(&self.hosts);
        let Some(files) = hosts.get(host) else {
            return Ok(Vec::new());
        };
        Ok(files
            .iter()
            .filter(|(name, file)| matcher.is_match(name.as_str()) && band.contains(file.age_minutes))
            .map(|(name, _)| format!("{}/{}", dir.trim_end_matches('/'), name))
            .collect())
    }

    async fn fetch(&self, host: &str, remote_path: &str, local: &Path) -> Result<()> {
        let file = self.file(host, remote_path)?;
        let name = file_name(remote_path).to_string();
        let mut content = file.content;
        if lock(&self.corrupt).contains(&name) {
            content.extend_from_slice(b"\0garbled");
        }
        tracing::debug!(file = %name, "Fake transfer");
        lock(&self.fetched).push(name);
        tokio::fs::write(local, content).await?;
        Ok(())
    }

    async fn checksum(&self, host: &str, remote_path: &str) -> Result<String> {
        let file = self.file(host, remote_path)?;
        Ok(crate::md5_hex(&file.content))
    }

    async fn list_checksums(&self, host: &str, _dir: &str, prefix: &str) -> Result<Listing> {
        self.reachable(host)?;
        let hosts = lock(&self.hosts);
        Ok(hosts
            .get(host)
            .map(|files| {
                files
                    .iter()
                    .filter(|(name, _)| name.starts_with(prefix))
                    .map(|(name, file)| (name.clone(), crate::md5_hex(&file.content)))
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
