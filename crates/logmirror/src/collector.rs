//! Listing collection for reconciliation.
//!
//! Every listing is collected fresh and written to the audit directory. A
//! source that cannot be listed degrades to an empty listing: the gap report
//! then errs on the side of reporting too much.

use crate::listing::{save_to_disk, Listing, Stage};
use crate::local::LocalTools;
use crate::remote::RemoteHost;
use crate::shard::{is_stray_artifact, TEMP_SUFFIX};
use crate::storage::{by_file_name, by_key, StorageLister};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct ListingCollector {
    remote: Arc<dyn RemoteHost>,
    local: Arc<dyn LocalTools>,
    storage: Option<Arc<dyn StorageLister>>,
    output_dir: PathBuf,
}

impl ListingCollector {
    pub fn new(
        remote: Arc<dyn RemoteHost>,
        local: Arc<dyn LocalTools>,
        storage: Option<Arc<dyn StorageLister>>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            remote,
            local,
            storage,
            output_dir,
        }
    }

    /// Files under `prefix` in a local raw or gzip directory
    pub async fn local(&self, stage: Stage, dir: &Path, prefix: &str) -> Listing {
        let listing = match self.local.list_checksums(dir, prefix).await {
            Ok(listing) => settled(stage, listing),
            Err(e) => {
                error!(%stage, dir = %dir.display(), error = %e, "Local listing failed");
                Listing::new()
            }
        };
        info!(%stage, prefix, files = listing.len(), "Collected local listing");
        self.persist(stage, prefix, &listing);
        listing
    }

    /// Files under `prefix` in the remote log folder
    pub async fn remote(&self, host: &str, dir: &str, prefix: &str) -> Listing {
        let listing = match self.remote.list_checksums(host, dir, prefix).await {
            Ok(listing) => listing,
            Err(e) => {
                error!(host, error = %e, "Remote listing failed");
                Listing::new()
            }
        };
        info!(host, prefix, files = listing.len(), "Collected remote listing");
        self.persist(Stage::Remote, prefix, &listing);
        listing
    }

    /// Objects under `key_prefix`, keyed by file name.
    ///
    /// The audit file keeps the full keys and is named after `pattern`.
    pub async fn storage(&self, bucket: &str, key_prefix: &str, pattern: &str) -> Listing {
        let objects = match &self.storage {
            Some(lister) => match lister.list(bucket, key_prefix).await {
                Ok(objects) => objects,
                Err(e) => {
                    error!(bucket, key_prefix, error = %e, "Storage listing failed");
                    Vec::new()
                }
            },
            None => {
                warn!(bucket, "No storage lister configured");
                Vec::new()
            }
        };
        info!(bucket, key_prefix, objects = objects.len(), "Collected storage listing");
        self.persist(Stage::Storage, pattern, &by_key(&objects));
        by_file_name(&objects)
    }

    fn persist(&self, stage: Stage, pattern: &str, listing: &Listing) {
        if let Err(e) = save_to_disk(&self.output_dir, stage, pattern, listing) {
            warn!(%stage, pattern, error = %e, "Failed to save listing");
        }
    }
}

/// Drop files a running downloader has not finished with: `.tmp` transfers,
/// and in the raw directory also `.gz` output not yet moved to the archive
fn settled(stage: Stage, listing: Listing) -> Listing {
    let in_flight = |name: &str| match stage {
        Stage::Raw => is_stray_artifact(name),
        _ => name.ends_with(TEMP_SUFFIX),
    };
    if !listing.names().any(|name| in_flight(name)) {
        return listing;
    }
    listing
        .iter()
        .filter(|&(name, _)| !in_flight(name))
        .collect()
}
