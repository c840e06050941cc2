//! End-to-end tests for a reconciliation round
//!
//! Real local archive directories, in-memory remote and storage, recording
//! notifier and metrics sink.

use chrono::{NaiveDate, NaiveDateTime};
use logmirror::{CheckKind, Checker, GapKind, ListingCollector, MirrorConfig, NativeTools};
use logmirror_test_utils::{FakeRemote, FakeStorage, RecordingMetrics, RecordingNotifier};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const HOST: &str = "dk@ded5128.example.net";
const BUCKET: &str = "log-archive";

struct TestEnv {
    _temp: TempDir,
    pub config: Arc<MirrorConfig>,
    pub raw_dir: PathBuf,
    pub gzip_dir: PathBuf,
    pub output_dir: PathBuf,
    pub remote: Arc<FakeRemote>,
    pub storage: Arc<FakeStorage>,
    pub notifier: Arc<RecordingNotifier>,
    pub metrics: Arc<RecordingMetrics>,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let root = temp.path().join("archive");
        let output_dir = temp.path().join("listings");
        let config = MirrorConfig::from_toml(&format!(
            r#"
            [[servers]]
            name = "ded5128"

            [[log_types]]
            prefix = "imp"
            folder_suffix = "impressions"

            [remote]
            user = "dk"
            domain = "example.net"
            log_folder = "/home/dk/log"

            [archive]
            root = "{}"

            [check]
            output_dir = "{}"

            [storage]
            bucket = "{BUCKET}"
            path_template = "{{suffix}}/{{year}}/{{month}}/{{day}}/{{hour}}/"
            "#,
            root.display(),
            output_dir.display()
        ))
        .expect("Failed to parse config");

        let raw_dir = root.join("raw_impressions").join("ded5128");
        let gzip_dir = root.join("gzip_impressions").join("ded5128");
        fs::create_dir_all(&raw_dir).unwrap();
        fs::create_dir_all(&gzip_dir).unwrap();

        Self {
            _temp: temp,
            config: Arc::new(config),
            raw_dir,
            gzip_dir,
            output_dir,
            remote: Arc::new(FakeRemote::new()),
            storage: Arc::new(FakeStorage::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            metrics: Arc::new(RecordingMetrics::new()),
        }
    }

    fn checker(&self) -> Arc<Checker> {
        let collector = ListingCollector::new(
            self.remote.clone(),
            Arc::new(NativeTools),
            Some(self.storage.clone()),
            self.output_dir.clone(),
        );
        Arc::new(Checker::new(
            Arc::clone(&self.config),
            collector,
            self.notifier.clone(),
            self.metrics.clone(),
        ))
    }

    /// A remote file that was downloaded and compressed
    fn mirrored(&self, name: &str, content: &[u8]) {
        self.remote.add_file(HOST, name, content, 90);
        fs::write(self.raw_dir.join(name), content).unwrap();
        fs::write(self.gzip_dir.join(format!("{name}.gz")), content).unwrap();
    }

    fn audit_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.output_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2016, 5, 9).unwrap().and_hms_opt(21, 0, 0).unwrap()
}

fn sorted(mut counts: Vec<usize>) -> Vec<usize> {
    counts.sort();
    counts
}

#[tokio::test]
async fn test_clean_round() {
    let env = TestEnv::new();
    env.mirrored("imp_log_V02_ded5128_2016-05-09_20_00.log", b"a\n");
    env.mirrored("imp_log_V02_ded5128_2016-05-09_21_00.log", b"b\n");
    let uploaded = "imp_log_V02_ded5128_2016-05-07_21_00.log.gz";
    fs::write(env.gzip_dir.join(uploaded), b"old\n").unwrap();
    env.storage.put(BUCKET, &format!("impressions/2016/05/07/21/{uploaded}"), b"old\n");

    let report = env.checker().run(base()).await;

    assert_eq!(report.outcomes.len(), 3);
    assert!(!report.has_local_gaps());
    assert!(env.notifier.alerts().is_empty());
    // One metric per computed gap, zeros included
    assert_eq!(env.metrics.counts(GapKind::Download), vec![0, 0]);
    assert_eq!(env.metrics.counts(GapKind::Compress), vec![0, 0]);
    assert_eq!(env.metrics.counts(GapKind::Upload), vec![0]);
}

#[tokio::test]
async fn test_alerting_hour_reports_missing_download() {
    let env = TestEnv::new();
    env.mirrored("imp_log_V02_ded5128_2016-05-09_20_00.log", b"a\n");
    env.remote.add_file(HOST, "imp_log_V02_ded5128_2016-05-09_20_10.log", b"lost\n", 80);

    let report = env.checker().run(base()).await;

    assert!(report.has_local_gaps());
    let alerts = env.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].subject, "Some log files on ded5128 are not downloaded");
    assert_eq!(
        alerts[0].body,
        "Some files are not downloaded:\nimp_log_V02_ded5128_2016-05-09_20_10.log\n"
    );
    assert_eq!(sorted(env.metrics.counts(GapKind::Download)), vec![0, 1]);

    let alerting = report
        .outcomes
        .iter()
        .find(|o| o.plan.kind == CheckKind::Alerting)
        .unwrap();
    assert_eq!(alerting.gap(GapKind::Download).unwrap().len(), 1);
    assert!(alerting.gap(GapKind::Compress).unwrap().is_empty());
}

#[tokio::test]
async fn test_most_recent_hour_is_counted_but_silent() {
    let env = TestEnv::new();
    env.remote.add_file(HOST, "imp_log_V02_ded5128_2016-05-09_21_00.log", b"new\n", 20);
    fs::write(env.raw_dir.join("imp_log_V02_ded5128_2016-05-09_21_10.log"), b"raw\n").unwrap();
    env.remote.add_file(HOST, "imp_log_V02_ded5128_2016-05-09_21_10.log", b"raw\n", 15);

    let report = env.checker().run(base()).await;

    assert!(!report.has_local_gaps());
    assert!(env.notifier.alerts().is_empty());
    assert_eq!(sorted(env.metrics.counts(GapKind::Download)), vec![0, 1]);
    assert_eq!(sorted(env.metrics.counts(GapKind::Compress)), vec![0, 1]);
}

#[tokio::test]
async fn test_in_flight_downloader_files_are_not_gaps() {
    let env = TestEnv::new();
    let name = "imp_log_V02_ded5128_2016-05-09_20_00.log";
    env.mirrored(name, b"a\n");
    // Mid-compression and mid-transfer leftovers sharing the hour prefix
    fs::write(env.raw_dir.join(format!("{name}.gz")), b"staged").unwrap();
    fs::write(env.raw_dir.join("imp_log_V02_ded5128_2016-05-09_20_10.log.tmp"), b"part").unwrap();

    let report = env.checker().run(base()).await;

    assert!(!report.has_local_gaps());
    assert!(env.notifier.alerts().is_empty());
    assert_eq!(env.metrics.counts(GapKind::Compress), vec![0, 0]);
}

#[tokio::test]
async fn test_upload_gap_alerts_on_missing_object() {
    let env = TestEnv::new();
    let stored = "imp_log_V02_ded5128_2016-05-07_21_00.log.gz";
    let missing = "imp_log_V02_ded5128_2016-05-07_21_10.log.gz";
    fs::write(env.gzip_dir.join(stored), b"one\n").unwrap();
    fs::write(env.gzip_dir.join(missing), b"two\n").unwrap();
    env.storage.put(BUCKET, &format!("impressions/2016/05/07/21/{stored}"), b"one\n");
    // Same name under another hour does not count
    env.storage.put(BUCKET, &format!("impressions/2016/05/07/22/{missing}"), b"two\n");

    let report = env.checker().run(base()).await;

    assert!(!report.has_local_gaps());
    assert_eq!(env.metrics.counts(GapKind::Upload), vec![1]);
    let alerts = env.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].subject, "Some log files on ded5128 are not uploaded");
    assert!(alerts[0].body.contains(missing));
}

#[tokio::test]
async fn test_failed_sources_degrade_to_empty_listings() {
    let env = TestEnv::new();
    env.remote.add_file(HOST, "imp_log_V02_ded5128_2016-05-09_20_00.log", b"a\n", 80);
    env.remote.set_unreachable(HOST);
    fs::write(env.raw_dir.join("imp_log_V02_ded5128_2016-05-09_20_00.log"), b"a\n").unwrap();
    fs::write(env.gzip_dir.join("imp_log_V02_ded5128_2016-05-07_21_00.log.gz"), b"z\n").unwrap();
    env.storage.set_failing(true);

    let report = env.checker().run(base()).await;

    // Empty remote means nothing to download; local gaps still show
    assert!(report.has_local_gaps());
    assert_eq!(sorted(env.metrics.counts(GapKind::Download)), vec![0, 0]);
    assert_eq!(sorted(env.metrics.counts(GapKind::Compress)), vec![0, 1]);
    assert_eq!(env.metrics.counts(GapKind::Upload), vec![1]);

    let mut subjects: Vec<String> = env.notifier.alerts().into_iter().map(|a| a.subject).collect();
    subjects.sort();
    assert_eq!(
        subjects,
        vec![
            "Some log files on ded5128 are not compressed".to_string(),
            "Some log files on ded5128 are not uploaded".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_listings_are_saved_for_audit() {
    let env = TestEnv::new();
    env.mirrored("imp_log_V02_ded5128_2016-05-09_20_00.log", b"a\n");
    env.remote.add_file(HOST, "imp_log_V02_ded5128_2016-05-09_20_10.log", b"b\n", 80);

    env.checker().run(base()).await;

    let files = env.audit_files();
    for expected in [
        "remote_imp_log_V02_ded5128_2016-05-09_20_2.txt",
        "raw_imp_log_V02_ded5128_2016-05-09_20_1.txt",
        "gzip_imp_log_V02_ded5128_2016-05-09_20_1.txt",
        "remote_imp_log_V02_ded5128_2016-05-09_21_0.txt",
        "gzip_imp_log_V02_ded5128_2016-05-07_21_0.txt",
        "storage_imp_log_V02_ded5128_2016-05-07_21_0.txt",
    ] {
        assert!(files.iter().any(|f| f == expected), "missing {expected} in {files:?}");
    }

    let remote = fs::read_to_string(
        env.output_dir.join("remote_imp_log_V02_ded5128_2016-05-09_20_2.txt"),
    )
    .unwrap();
    assert_eq!(remote.lines().count(), 2);
    assert!(remote.contains("  imp_log_V02_ded5128_2016-05-09_20_10.log"));
}
