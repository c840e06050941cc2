//! Multi-stage reconciliation.
//!
//! Compares the listings of adjacent pipeline stages for one
//! (server, log type, hour) unit and reports what fell through:
//!
//! ```text
//!  remote ──download──▶ raw ──compress──▶ gzip ──upload──▶ storage
//! ```
//!
//! The diff itself is pure; [`emit`] turns non-empty gaps into alerts and
//! every computed gap into a metric.

use crate::listing::Listing;
use crate::notify::{MetricEvent, MetricsSink, Notifier};
use crate::shard::GZIP_SUFFIX;
use std::collections::BTreeSet;
use std::fmt;

/// Which hand-off between stages a gap belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GapKind {
    /// remote → raw
    Download,
    /// raw → gzip
    Compress,
    /// gzip → storage
    Upload,
}

impl GapKind {
    /// Event tag used for metrics
    pub fn event_name(&self) -> &'static str {
        match self {
            GapKind::Download => "download_missing",
            GapKind::Compress => "gzip_missing",
            GapKind::Upload => "s3_missing",
        }
    }

    fn past_participle(&self) -> &'static str {
        match self {
            GapKind::Download => "downloaded",
            GapKind::Compress => "compressed",
            GapKind::Upload => "uploaded",
        }
    }
}

impl fmt::Display for GapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GapKind::Download => "download",
            GapKind::Compress => "compress",
            GapKind::Upload => "upload",
        })
    }
}

/// File names present in one stage but missing or different in the next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapReport {
    pub kind: GapKind,
    pub files: BTreeSet<String>,
}

impl GapReport {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn subject(&self, server: &str) -> String {
        format!(
            "Some log files on {} are not {}",
            server,
            self.kind.past_participle()
        )
    }

    pub fn body(&self) -> String {
        let mut body = format!("Some files are not {}:\n", self.kind.past_participle());
        for name in &self.files {
            body.push_str(name);
            body.push('\n');
        }
        body
    }
}

/// All three gaps of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gaps {
    pub download: GapReport,
    pub compress: GapReport,
    pub upload: GapReport,
}

impl Gaps {
    pub fn reports(&self) -> [&GapReport; 3] {
        [&self.download, &self.compress, &self.upload]
    }
}

pub fn reconcile(remote: &Listing, raw: &Listing, gzip: &Listing, storage: &Listing) -> Gaps {
    Gaps {
        download: download_gap(remote, raw),
        compress: compress_gap(raw, gzip),
        upload: upload_gap(gzip, storage),
    }
}

/// Remote files missing from the raw copy or differing in checksum
pub fn download_gap(remote: &Listing, raw: &Listing) -> GapReport {
    GapReport {
        kind: GapKind::Download,
        files: missing_or_changed(remote, raw),
    }
}

/// Raw files without a `.gz` counterpart
pub fn compress_gap(raw: &Listing, gzip: &Listing) -> GapReport {
    GapReport {
        kind: GapKind::Compress,
        files: raw
            .names()
            .filter(|name| !gzip.contains(&format!("{name}{GZIP_SUFFIX}")))
            .map(str::to_string)
            .collect(),
    }
}

/// Local gzip files missing from storage or differing in checksum
pub fn upload_gap(gzip: &Listing, storage: &Listing) -> GapReport {
    GapReport {
        kind: GapKind::Upload,
        files: missing_or_changed(gzip, storage),
    }
}

fn missing_or_changed(source: &Listing, target: &Listing) -> BTreeSet<String> {
    source
        .iter()
        .filter(|(name, checksum)| target.checksum(name) != Some(*checksum))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Who a report is about
#[derive(Debug, Clone, Copy)]
pub struct ReportTarget<'a> {
    pub server: &'a str,
    pub log_type: &'a str,
}

/// Send one alert per non-empty report when `alerting`, and one metric per
/// report regardless.
pub async fn emit(
    reports: &[&GapReport],
    target: ReportTarget<'_>,
    alerting: bool,
    notifier: &dyn Notifier,
    metrics: &dyn MetricsSink,
) {
    for report in reports {
        if !report.is_empty() {
            tracing::warn!(
                server = target.server,
                log_type = target.log_type,
                gap = %report.kind,
                files = report.len(),
                alerting,
                "Pipeline gap detected"
            );
            if alerting {
                notifier
                    .send(&report.subject(target.server), &report.body())
                    .await;
            }
        }

        let event = MetricEvent::now(
            report.kind,
            target.server,
            target.log_type,
            report.len(),
        );
        metrics.record(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(entries: &[(&str, &str)]) -> Listing {
        entries.iter().copied().collect()
    }

    fn names(report: &GapReport) -> Vec<&str> {
        report.files.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_download_gap_missing_file() {
        let remote = listing(&[("a.log", "m1"), ("b.log", "m2")]);
        let raw = listing(&[("a.log", "m1")]);
        assert_eq!(names(&download_gap(&remote, &raw)), vec!["b.log"]);
    }

    #[test]
    fn test_download_gap_checksum_mismatch() {
        let remote = listing(&[("a.log", "m1")]);
        let raw = listing(&[("a.log", "stale")]);
        assert_eq!(names(&download_gap(&remote, &raw)), vec!["a.log"]);
    }

    #[test]
    fn test_compress_gap_satisfied_by_gz_name() {
        let raw = listing(&[("a.log", "m1")]);
        let gzip = listing(&[("a.log.gz", "m3")]);
        assert!(compress_gap(&raw, &gzip).is_empty());

        let gzip = listing(&[("other.log.gz", "m3")]);
        assert_eq!(names(&compress_gap(&raw, &gzip)), vec!["a.log"]);
    }

    #[test]
    fn test_upload_gap_missing_from_storage() {
        let gzip = listing(&[("a.log.gz", "m3")]);
        let gap = upload_gap(&gzip, &Listing::new());
        assert_eq!(names(&gap), vec!["a.log.gz"]);
        assert_eq!(gap.len(), 1);
    }

    #[test]
    fn test_extra_files_downstream_are_not_gaps() {
        let remote = listing(&[("a.log", "m1")]);
        let raw = listing(&[("a.log", "m1"), ("old.log", "m9")]);
        let gzip = listing(&[("a.log.gz", "g1"), ("old.log.gz", "g9")]);
        let storage = listing(&[("a.log.gz", "g1"), ("old.log.gz", "g9"), ("x.gz", "g0")]);
        let gaps = reconcile(&remote, &raw, &gzip, &storage);
        assert!(gaps.reports().iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let remote = listing(&[("c.log", "m3"), ("a.log", "m1"), ("b.log", "m2")]);
        let raw = listing(&[("b.log", "m2")]);
        let gzip = listing(&[]);
        let storage = listing(&[]);

        let first = reconcile(&remote, &raw, &gzip, &storage);
        let second = reconcile(&remote, &raw, &gzip, &storage);
        assert_eq!(first, second);

        let reordered_remote = listing(&[("b.log", "m2"), ("a.log", "m1"), ("c.log", "m3")]);
        assert_eq!(reconcile(&reordered_remote, &raw, &gzip, &storage), first);
        assert_eq!(names(&first.download), vec!["a.log", "c.log"]);
        assert_eq!(names(&first.compress), vec!["b.log"]);
    }

    #[test]
    fn test_alert_text() {
        let report = GapReport {
            kind: GapKind::Download,
            files: ["b.log".to_string(), "a.log".to_string()].into_iter().collect(),
        };
        assert_eq!(report.subject("ded5128"), "Some log files on ded5128 are not downloaded");
        assert_eq!(report.body(), "Some files are not downloaded:\na.log\nb.log\n");
    }
}
