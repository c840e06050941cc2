//! Download & verify stage.
//!
//! Every file lands as `<name>.tmp` first and only becomes `<name>` after
//! its local checksum matches the remote one. Nothing is retried within a
//! pass: a file that fails stays `Absent` and is found again next pass.

use crate::cancel::CancellationToken;
use crate::error::MirrorError;
use crate::listing::file_name;
use crate::local::LocalTools;
use crate::remote::RemoteHost;
use crate::shard::{FileStatus, ShardPaths};
use crate::window::AgeBand;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Verified and renamed into place
    Promoted,
    TransferFailed,
    ChecksumMismatch,
    /// Checksum could not be computed or the final rename failed
    VerifyFailed,
}

/// Remote source of one shard
#[derive(Debug, Clone)]
pub struct RemoteSource {
    /// `user@host` address
    pub host: String,
    pub dir: String,
    pub glob: String,
}

pub struct DownloadStage {
    source: RemoteSource,
    paths: ShardPaths,
    remote: Arc<dyn RemoteHost>,
    local: Arc<dyn LocalTools>,
    cancel: CancellationToken,
}

impl DownloadStage {
    pub fn new(
        source: RemoteSource,
        paths: ShardPaths,
        remote: Arc<dyn RemoteHost>,
        local: Arc<dyn LocalTools>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            paths,
            remote,
            local,
            cancel,
        }
    }

    /// Fetch every absent file of one hour bucket.
    ///
    /// Returns how many files were attempted; failures count too, since
    /// they still prove the bucket had new data.
    pub async fn download(&self, bucket_hour: u32) -> usize {
        let band = AgeBand::for_bucket(bucket_hour);
        info!(
            host = %self.source.host,
            dir = %self.source.dir,
            glob = %self.source.glob,
            bucket_hour,
            "Scanning remote bucket"
        );

        let remote_paths = match self
            .remote
            .find(&self.source.host, &self.source.dir, &self.source.glob, band)
            .await
        {
            Ok(paths) => paths,
            Err(e) => {
                warn!(host = %self.source.host, bucket_hour, error = %e, "Remote scan failed");
                return 0;
            }
        };

        let mut attempted = 0;
        for remote_path in &remote_paths {
            if self.cancel.is_cancelled() {
                break;
            }
            let name = file_name(remote_path);
            if name.is_empty() {
                continue;
            }
            match self.paths.status(name) {
                FileStatus::Absent => {}
                status => {
                    debug!(file = name, ?status, "Already present locally");
                    continue;
                }
            }
            attempted += 1;
            self.fetch_and_verify(remote_path, name).await;
        }
        attempted
    }

    /// Transfer one file to its temp name, verify, then promote or discard.
    pub async fn fetch_and_verify(&self, remote_path: &str, name: &str) -> DownloadOutcome {
        let temp = self.paths.temp_path(name);
        info!(file = name, "Start to download");

        if let Err(e) = self
            .remote
            .fetch(&self.source.host, remote_path, &temp)
            .await
        {
            discard(&temp).await;
            warn!(file = name, error = %e, "Download failed");
            return DownloadOutcome::TransferFailed;
        }

        let verified = self.verify(remote_path, name, &temp).await;
        match verified {
            Ok(()) => {}
            Err(MirrorError::ChecksumMismatch { remote, local, .. }) => {
                discard(&temp).await;
                warn!(file = name, %remote, %local, "Validation failed");
                return DownloadOutcome::ChecksumMismatch;
            }
            Err(e) => {
                discard(&temp).await;
                warn!(file = name, error = %e, "Validation could not complete");
                return DownloadOutcome::VerifyFailed;
            }
        }

        let target = self.paths.raw_path(name);
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            discard(&temp).await;
            warn!(file = name, error = %e, "Failed to promote verified download");
            return DownloadOutcome::VerifyFailed;
        }

        info!(file = name, "Download success");
        DownloadOutcome::Promoted
    }

    async fn verify(&self, remote_path: &str, name: &str, temp: &Path) -> crate::Result<()> {
        let local = self.local.checksum(temp).await?;
        let remote = self
            .remote
            .checksum(&self.source.host, remote_path)
            .await?;
        if local != remote {
            return Err(MirrorError::ChecksumMismatch {
                name: name.to_string(),
                remote,
                local,
            });
        }
        Ok(())
    }
}

/// Remove a temp file if it exists
pub(crate) async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
    }
}
