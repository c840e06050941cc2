//! Logmirror - Hourly Log Mirroring & Reconciliation
//!
//! Logmirror pulls rotated log files from a fleet of servers, verifies each
//! transfer by checksum, compresses the verified files into a local archive,
//! and audits the whole pipeline once an hour.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │   Remote    │     │    Raw      │     │    Gzip     │     │    Object     │
//! │   servers   │────▶│  (verified  │────▶│  (archive)  │────▶│    storage    │
//! │  (ssh/scp)  │     │   copies)   │     │             │     │  (uploaded)   │
//! └─────────────┘     └─────────────┘     └─────────────┘     └───────────────┘
//!        │                   │                   │                    │
//!        └───────────────────┴─────── check ─────┴────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Shard**: one (server, log type) pair, owned by exactly one worker
//! - **Window**: the range of hour buckets a worker scans, resized each pass
//! - **Listing**: file name to checksum map of one stage for one hour
//! - **Gap**: files present in one stage and missing from the next

pub mod cancel;
pub mod check;
pub mod collector;
pub mod compress;
pub mod config;
pub mod download;
pub mod error;
pub mod exec;
pub mod instance;
pub mod listing;
pub mod local;
pub mod notify;
pub mod reconcile;
pub mod remote;
pub mod shard;
pub mod storage;
pub mod window;
pub mod worker;

// Re-exports for convenience
pub use cancel::CancellationToken;
pub use check::{CheckKind, CheckPlan, CheckReport, Checker};
pub use collector::ListingCollector;
pub use config::MirrorConfig;
pub use error::{MirrorError, Result};
pub use listing::{Listing, Stage};
pub use local::{LocalTools, NativeTools};
pub use notify::{MetricEvent, MetricsSink, Notifier};
pub use reconcile::{GapKind, GapReport, Gaps};
pub use remote::{RemoteHost, SshRemote};
pub use shard::{FileStatus, Shard, ShardPaths};
pub use storage::{StorageLister, StorageObject};
pub use window::{AgeBand, Discovery, WindowState};
pub use worker::{run_downloader, PassSummary, ShardWorker};
