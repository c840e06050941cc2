//! Alert and metrics sinks.
//!
//! Both are best effort: failures are logged and never propagate into the
//! reconciliation run.

use crate::error::{MirrorError, Result};
use crate::exec;
use crate::reconcile::GapKind;
use async_trait::async_trait;
use reqwest::StatusCode;

const MEASUREMENT: &str = "errMsg";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str);
}

/// Pipes the body into `mail -s <subject> <recipients>`
#[derive(Debug, Clone)]
pub struct MailNotifier {
    program: String,
    recipients: Vec<String>,
}

impl MailNotifier {
    pub fn new(program: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            program: program.into(),
            recipients,
        }
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    async fn send(&self, subject: &str, body: &str) {
        let args = vec![
            "-s".to_string(),
            subject.to_string(),
            self.recipients.join(","),
        ];
        if let Err(e) = exec::run_with_stdin(&self.program, &args, body).await {
            tracing::warn!(subject, error = %e, "Failed to send alert mail");
        }
    }
}

/// Used when no recipients are configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) {
        tracing::warn!(subject, body, "Alert");
    }
}

/// One gap counter sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricEvent {
    pub kind: GapKind,
    pub server: String,
    pub log_type: String,
    pub count: usize,
    /// Unix seconds
    pub timestamp: i64,
}

impl MetricEvent {
    pub fn now(kind: GapKind, server: &str, log_type: &str, count: usize) -> Self {
        Self {
            kind,
            server: server.to_string(),
            log_type: log_type.to_string(),
            count,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// InfluxDB line protocol, nanosecond precision
    pub fn to_line_protocol(&self) -> String {
        format!(
            "{},event={},server={},log_type={} count={} {}000000000",
            MEASUREMENT,
            self.kind.event_name(),
            escape_tag(&self.server),
            escape_tag(&self.log_type),
            self.count,
            self.timestamp
        )
    }
}

fn escape_tag(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, event: &MetricEvent);
}

/// Posts samples to an InfluxDB write endpoint
#[derive(Debug, Clone)]
pub struct InfluxSink {
    url: String,
    http_client: reqwest::Client,
}

impl InfluxSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Post one sample; anything but 204 No Content is a rejection
    pub async fn submit(&self, event: &MetricEvent) -> Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(event.to_line_protocol())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            return Err(MirrorError::MetricsRejected(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn record(&self, event: &MetricEvent) {
        if let Err(e) = self.submit(event).await {
            tracing::warn!(error = %e, event = event.kind.event_name(), "Failed to send metric");
        }
    }
}

/// Used when no metrics endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMetrics;

#[async_trait]
impl MetricsSink for LogMetrics {
    async fn record(&self, event: &MetricEvent) {
        tracing::info!(
            event = event.kind.event_name(),
            server = %event.server,
            log_type = %event.log_type,
            count = event.count,
            "Gap metric"
        );
    }
}
