//! One reconciliation round.
//!
//! For every shard three short-lived tasks run side by side:
//!
//! - **bookkeeping**: remote/raw/gzip for the most recent hour, gaps are
//!   counted but not alerted since downloads may still be in flight;
//! - **alerting**: the same comparison one hour further back, alerts on;
//! - **upload**: local gzip against the storage inventory for an hour old
//!   enough that the archive upload must have happened.
//!
//! All tasks are joined before the round returns.

use crate::collector::ListingCollector;
use crate::config::MirrorConfig;
use crate::listing::Stage;
use crate::notify::{MetricsSink, Notifier};
use crate::reconcile::{compress_gap, download_gap, emit, upload_gap, GapKind, GapReport, ReportTarget};
use crate::shard::{shards, storage_prefix, Shard};
use chrono::{Duration, NaiveDateTime};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    Bookkeeping,
    Alerting,
    Upload,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckKind::Bookkeeping => "bookkeeping",
            CheckKind::Alerting => "alerting",
            CheckKind::Upload => "upload",
        })
    }
}

/// One check to run against every shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckPlan {
    pub kind: CheckKind,
    pub hour: NaiveDateTime,
}

impl CheckPlan {
    pub fn alerting(&self) -> bool {
        !matches!(self.kind, CheckKind::Bookkeeping)
    }
}

/// Checks for a round whose base hour is `base`
pub fn plan(config: &MirrorConfig, base: NaiveDateTime) -> Vec<CheckPlan> {
    let hours_before = |h: u32| base - Duration::hours(i64::from(h));
    let mut plans = vec![
        CheckPlan {
            kind: CheckKind::Bookkeeping,
            hour: hours_before(config.check.silent_offset_hours),
        },
        CheckPlan {
            kind: CheckKind::Alerting,
            hour: hours_before(config.check.alert_offset_hours),
        },
    ];
    if config.storage.is_some() {
        plans.push(CheckPlan {
            kind: CheckKind::Upload,
            hour: hours_before(config.check.upload_lag_hours),
        });
    }
    plans
}

/// Gaps found by one (shard, check) task
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub shard: Shard,
    pub plan: CheckPlan,
    pub gaps: Vec<GapReport>,
}

impl CheckOutcome {
    pub fn gap(&self, kind: GapKind) -> Option<&GapReport> {
        self.gaps.iter().find(|g| g.kind == kind)
    }
}

/// Everything a round found
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl CheckReport {
    /// Download or compress gaps seen by an alerting check
    pub fn has_local_gaps(&self) -> bool {
        self.outcomes
            .iter()
            .filter(|o| o.plan.kind == CheckKind::Alerting)
            .flat_map(|o| o.gaps.iter())
            .any(|g| matches!(g.kind, GapKind::Download | GapKind::Compress) && !g.is_empty())
    }
}

pub struct Checker {
    config: Arc<MirrorConfig>,
    collector: ListingCollector,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<dyn MetricsSink>,
}

impl Checker {
    pub fn new(
        config: Arc<MirrorConfig>,
        collector: ListingCollector,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            collector,
            notifier,
            metrics,
        }
    }

    /// Run every planned check for every shard and wait for all of them
    pub async fn run(self: Arc<Self>, base: NaiveDateTime) -> CheckReport {
        let plans = plan(&self.config, base);
        let mut handles = Vec::new();
        for shard in shards(&self.config) {
            for plan in &plans {
                let checker = Arc::clone(&self);
                let shard = shard.clone();
                let plan = *plan;
                let span = tracing::info_span!(
                    "check",
                    server = %shard.server.name,
                    log_type = %shard.log_type.folder_suffix,
                    kind = %plan.kind
                );
                handles.push(tokio::spawn(
                    async move { checker.check_shard(shard, plan).await }.instrument(span),
                ));
            }
        }

        let mut report = CheckReport::default();
        for handle in handles {
            match handle.await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => error!(error = %e, "Check task panicked"),
            }
        }
        report
    }

    pub async fn check_shard(&self, shard: Shard, plan: CheckPlan) -> CheckOutcome {
        let gaps = match plan.kind {
            CheckKind::Bookkeeping | CheckKind::Alerting => self.local_gaps(&shard, plan.hour).await,
            CheckKind::Upload => self.upload_gaps(&shard, plan.hour).await,
        };

        let refs: Vec<&GapReport> = gaps.iter().collect();
        emit(
            &refs,
            ReportTarget {
                server: &shard.server.name,
                log_type: &shard.log_type.folder_suffix,
            },
            plan.alerting(),
            self.notifier.as_ref(),
            self.metrics.as_ref(),
        )
        .await;

        CheckOutcome { shard, plan, gaps }
    }

    async fn local_gaps(&self, shard: &Shard, hour: NaiveDateTime) -> Vec<GapReport> {
        let prefix = shard.hour_prefix(self.config.version, hour);
        let paths = shard.paths(&self.config.archive.root);

        let raw = self.collector.local(Stage::Raw, &paths.raw_dir, &prefix).await;
        let gzip = self.collector.local(Stage::Gzip, &paths.gzip_dir, &prefix).await;
        let remote = self
            .collector
            .remote(
                &self.config.remote.host_for(&shard.server),
                &self.config.remote.log_folder,
                &prefix,
            )
            .await;
        info!(
            prefix = %prefix,
            remote = remote.len(),
            raw = raw.len(),
            gzip = gzip.len(),
            "Listings collected"
        );

        vec![download_gap(&remote, &raw), compress_gap(&raw, &gzip)]
    }

    async fn upload_gaps(&self, shard: &Shard, hour: NaiveDateTime) -> Vec<GapReport> {
        let Some(storage) = &self.config.storage else {
            return Vec::new();
        };
        let prefix = shard.hour_prefix(self.config.version, hour);
        let paths = shard.paths(&self.config.archive.root);
        let key_prefix = format!(
            "{}{}",
            storage_prefix(&storage.path_template, &shard.log_type, hour),
            prefix
        );

        let stored = self
            .collector
            .storage(&storage.bucket, &key_prefix, &prefix)
            .await;
        let gzip = self.collector.local(Stage::Gzip, &paths.gzip_dir, &prefix).await;

        vec![upload_gap(&gzip, &stored)]
    }
}

/// Parse a `--date` value such as `2016-05-09 21:00`
pub fn parse_base_hour(value: &str) -> crate::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M")
        .map(crate::shard::hour_floor)
        .map_err(|e| crate::MirrorError::config(format!("invalid date '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn config(with_storage: bool) -> MirrorConfig {
        let mut toml = String::from(
            r#"
            [[servers]]
            name = "ded5128"
            [[log_types]]
            prefix = "imp"
            folder_suffix = "impressions"
            [remote]
            user = "dk"
            domain = "example.net"
            log_folder = "/logs"
            [archive]
            root = "/data"
            [check]
            output_dir = "/listings"
            "#,
        );
        if with_storage {
            toml.push_str("[storage]\nbucket = \"b\"\npath_template = \"{suffix}/\"\n");
        }
        MirrorConfig::from_toml(&toml).unwrap()
    }

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 5, 9).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn test_plan_hours() {
        let plans = plan(&config(true), hour(21));
        assert_eq!(
            plans,
            vec![
                CheckPlan { kind: CheckKind::Bookkeeping, hour: hour(21) },
                CheckPlan { kind: CheckKind::Alerting, hour: hour(20) },
                CheckPlan {
                    kind: CheckKind::Upload,
                    hour: NaiveDate::from_ymd_opt(2016, 5, 7).unwrap().and_hms_opt(21, 0, 0).unwrap()
                },
            ]
        );
        assert!(!plans[0].alerting());
        assert!(plans[1].alerting());
        assert!(plans[2].alerting());
    }

    #[test]
    fn test_plan_without_storage_skips_upload() {
        let plans = plan(&config(false), hour(21));
        assert!(plans.iter().all(|p| p.kind != CheckKind::Upload));
    }

    #[test]
    fn test_parse_base_hour() {
        assert_eq!(parse_base_hour("2016-05-09 21:00").unwrap(), hour(21));
        assert_eq!(parse_base_hour("2016-05-09 21:45").unwrap(), hour(21));
        assert!(parse_base_hour("yesterday").is_err());
    }
}
