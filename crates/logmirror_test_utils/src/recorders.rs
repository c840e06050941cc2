//! Notifier and metrics sink that remember what they were given.

use crate::remote::lock;
use async_trait::async_trait;
use logmirror::{GapKind, MetricEvent, MetricsSink, Notifier};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAlert {
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<RecordedAlert>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<RecordedAlert> {
        lock(&self.alerts).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, subject: &str, body: &str) {
        lock(&self.alerts).push(RecordedAlert {
            subject: subject.to_string(),
            body: body.to_string(),
        });
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        lock(&self.events).clone()
    }

    /// Counts recorded for one gap kind, in arrival order
    pub fn counts(&self, kind: GapKind) -> Vec<usize> {
        lock(&self.events)
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.count)
            .collect()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetrics {
    async fn record(&self, event: &MetricEvent) {
        lock(&self.events).push(event.clone());
    }
}
