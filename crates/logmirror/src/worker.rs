//! Download workers
//!
//! Design principles:
//! - One task per shard, never two tasks for the same shard
//! - Each worker owns its window; nothing mutable is shared between workers
//! - Shutdown is cooperative through the cancellation token, polled at loop
//!   boundaries; a transfer or compression in flight runs to completion

use crate::cancel::CancellationToken;
use crate::compress::CompressStage;
use crate::config::MirrorConfig;
use crate::download::{DownloadStage, RemoteSource};
use crate::error::Result;
use crate::local::LocalTools;
use crate::remote::RemoteHost;
use crate::shard::{shards, Shard, ShardPaths};
use crate::window::{Discovery, WindowState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Outcome of one sweep over the window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub discoveries: Vec<Discovery>,
    pub next_start_hour: u32,
}

impl PassSummary {
    pub fn total_files(&self) -> usize {
        self.discoveries.iter().map(|d| d.files).sum()
    }
}

pub struct ShardWorker {
    shard: Shard,
    paths: ShardPaths,
    window: WindowState,
    download: DownloadStage,
    compress: CompressStage,
    idle_backoff: Duration,
    cancel: CancellationToken,
}

impl ShardWorker {
    pub fn new(
        shard: Shard,
        config: &MirrorConfig,
        remote: Arc<dyn RemoteHost>,
        local: Arc<dyn LocalTools>,
        cancel: CancellationToken,
    ) -> Self {
        let paths = shard.paths(&config.archive.root);
        let source = RemoteSource {
            host: config.remote.host_for(&shard.server),
            dir: config.remote.log_folder.clone(),
            glob: shard.remote_glob(config.version),
        };
        let download = DownloadStage::new(
            source,
            paths.clone(),
            remote,
            Arc::clone(&local),
            cancel.clone(),
        );
        let compress = CompressStage::new(paths.clone(), local, cancel.clone());

        Self {
            shard,
            paths,
            window: WindowState::new(config.download.max_hour, config.download.burst_threshold),
            download,
            compress,
            idle_backoff: Duration::from_secs(config.download.idle_backoff_secs),
            cancel,
        }
    }

    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    pub fn start_hour(&self) -> u32 {
        self.window.start_hour()
    }

    /// Prepare directories and clean up after a previous run
    pub async fn start(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.paths.raw_dir).await?;
        tokio::fs::create_dir_all(&self.paths.gzip_dir).await?;
        self.compress.compress().await;
        Ok(())
    }

    /// Loop until cancelled
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        info!("Download worker start");

        while !self.cancel.is_cancelled() {
            let summary = self.run_pass().await;
            if summary.total_files() == 0 {
                self.cancel.sleep(self.idle_backoff).await;
            }
        }

        info!("Download worker stopped");
        Ok(())
    }

    /// Scan every bucket of the window, oldest first, compress, then move
    /// the window
    pub async fn run_pass(&mut self) -> PassSummary {
        let start_hour = self.window.start_hour();
        info!(start_hour, "Start loop");

        let mut discoveries = Vec::new();
        for hour in self.window.buckets() {
            if self.cancel.is_cancelled() {
                break;
            }
            let files = self.download.download(hour).await;
            discoveries.push(Discovery { hour, files });
        }

        // Every pass, so raw files left by a failed compression get retried
        let compressed = self.compress.compress().await;
        if compressed.failed > 0 {
            warn!(failed = compressed.failed, "Some files stay uncompressed until the next pass");
        }

        let next_start_hour = self.window.advance(&discoveries);
        if next_start_hour != start_hour {
            info!(start_hour, next_start_hour, "Scan window moved");
        }

        PassSummary {
            discoveries,
            next_start_hour,
        }
    }
}

/// Run one worker per shard until the token is cancelled.
///
/// A worker that fails to start is logged; the others keep running.
pub async fn run_downloader(
    config: &MirrorConfig,
    remote: Arc<dyn RemoteHost>,
    local: Arc<dyn LocalTools>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut handles = Vec::new();
    for shard in shards(config) {
        let worker = ShardWorker::new(
            shard.clone(),
            config,
            Arc::clone(&remote),
            Arc::clone(&local),
            cancel.clone(),
        );
        let span = tracing::info_span!("shard", server = %shard.server.name, log_type = %shard.log_type.folder_suffix);
        handles.push((shard, tokio::spawn(worker.run().instrument(span))));
    }

    info!(workers = handles.len(), "Download workers started");

    for (shard, handle) in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(%shard, error = %e, "Download worker failed"),
            Err(e) => error!(%shard, error = %e, "Download worker panicked"),
        }
    }

    Ok(())
}
