//! Compression stage.
//!
//! Safe to run any number of times: stray `.gz`/`.tmp` files in the raw
//! directory are leftovers of an interrupted pass and are removed, every raw
//! file without an archived `.gz` is compressed next to it and then moved
//! into the archive. Raw files themselves are never deleted here.

use crate::cancel::CancellationToken;
use crate::download::discard;
use crate::local::LocalTools;
use crate::shard::{is_stray_artifact, FileStatus, ShardPaths};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Counts of one compression pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressSummary {
    pub strays_removed: usize,
    pub compressed: usize,
    pub failed: usize,
}

pub struct CompressStage {
    paths: ShardPaths,
    local: Arc<dyn LocalTools>,
    cancel: CancellationToken,
}

impl CompressStage {
    pub fn new(paths: ShardPaths, local: Arc<dyn LocalTools>, cancel: CancellationToken) -> Self {
        Self {
            paths,
            local,
            cancel,
        }
    }

    pub async fn compress(&self) -> CompressSummary {
        let mut summary = CompressSummary::default();
        let names = match raw_file_names(&self.paths.raw_dir).await {
            Ok(names) => names,
            Err(e) => {
                warn!(dir = %self.paths.raw_dir.display(), error = %e, "Cannot list raw directory");
                return summary;
            }
        };

        // Strays go first so a fresh `<name>.gz` staged below is never
        // mistaken for one.
        let (strays, raw): (Vec<String>, Vec<String>) =
            names.into_iter().partition(|name| is_stray_artifact(name));

        for name in strays {
            match tokio::fs::remove_file(self.paths.raw_path(&name)).await {
                Ok(()) => summary.strays_removed += 1,
                Err(e) => warn!(file = %name, error = %e, "Failed to remove stray file"),
            }
        }

        for name in raw {
            if self.cancel.is_cancelled() {
                break;
            }

            if self.paths.status(&name) != FileStatus::Raw {
                continue;
            }

            if self.compress_one(&name).await {
                summary.compressed += 1;
            } else {
                summary.failed += 1;
            }
        }

        summary
    }

    async fn compress_one(&self, name: &str) -> bool {
        info!(file = name, "Start to compress");
        let staged = self.paths.staged_gzip_path(name);

        if let Err(e) = self.local.compress(&self.paths.raw_path(name), &staged).await {
            discard(&staged).await;
            warn!(file = name, error = %e, "Compress failed");
            return false;
        }

        if let Err(e) = relocate(&staged, &self.paths.archived_path(name)).await {
            discard(&staged).await;
            warn!(file = name, error = %e, "Compress failed: cannot move into archive");
            return false;
        }

        info!(file = name, "Compress success");
        true
    }
}

async fn raw_file_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Rename, falling back to copy + remove across filesystems
async fn relocate(src: &Path, dst: &Path) -> io::Result<()> {
    if tokio::fs::rename(src, dst).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(src, dst).await?;
    tokio::fs::remove_file(src).await
}
