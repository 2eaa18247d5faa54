//! Folds full and partial metric updates into one overview snapshot and
//! derives a chart sample from every accepted update.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::history::{TimeSeriesBuffer, TimeSeriesPoint};
use crate::protocol::{MetricsUpdate, UpdateScope};
use crate::types::{OverviewSnapshot, ServerIdentity};

/// Chart keys and the `<section>.usage_percent` each one samples.
pub const CHART_KEYS: [(&str, ServerIdentity, &str); 5] = [
    ("ai_cpu", ServerIdentity::Ai, "cpu"),
    ("ai_memory", ServerIdentity::Ai, "memory"),
    ("ai_gpu", ServerIdentity::Ai, "gpu"),
    ("storage_cpu", ServerIdentity::Storage, "cpu"),
    ("app_cpu", ServerIdentity::App, "cpu"),
];

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("update scope `{0}` does not name a server")]
    UnknownScope(String),
    #[error("update for `{0}` does not carry a metrics object")]
    NotAnObject(ServerIdentity),
    #[error("overview payload is malformed: {0}")]
    Overview(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct Reconciler {
    overview: OverviewSnapshot,
    chart: TimeSeriesBuffer,
    last_update: Option<DateTime<Local>>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overview(&self) -> &OverviewSnapshot {
        &self.overview
    }

    pub fn chart(&self) -> &TimeSeriesBuffer {
        &self.chart
    }

    pub fn last_update(&self) -> Option<DateTime<Local>> {
        self.last_update
    }

    /// Route a live `metrics_update` to the full or keyed path.
    pub fn apply(&mut self, update: &MetricsUpdate) -> Result<(), ReconcileError> {
        match &update.scope {
            UpdateScope::Overview => self.apply_overview(&update.data),
            UpdateScope::Server(id) => self.merge_server(*id, &update.data),
            UpdateScope::Other(scope) => Err(ReconcileError::UnknownScope(scope.clone())),
        }
    }

    pub fn apply_overview(&mut self, payload: &Value) -> Result<(), ReconcileError> {
        let snapshot = OverviewSnapshot::from_value(payload)?;
        self.replace(snapshot);
        Ok(())
    }

    /// Replace the whole snapshot; nothing from the previous state survives.
    pub fn replace(&mut self, snapshot: OverviewSnapshot) {
        self.overview = snapshot;
        self.accept();
    }

    /// Merge one server's partial document; other servers are left as is.
    pub fn merge_server(&mut self, id: ServerIdentity, data: &Value) -> Result<(), ReconcileError> {
        let Value::Object(patch) = data else {
            return Err(ReconcileError::NotAnObject(id));
        };
        self.overview.servers.entry(id).or_default().merge(patch);
        self.overview.online_servers = self.overview.count_online();
        self.accept();
        Ok(())
    }

    /// Sample the chart keys from whatever is currently known.
    pub fn sample(&self) -> TimeSeriesPoint {
        let values: BTreeMap<String, f64> = CHART_KEYS
            .iter()
            .map(|(key, id, section)| (key.to_string(), self.overview.usage(*id, section)))
            .collect();
        TimeSeriesPoint::now(values)
    }

    fn accept(&mut self) {
        let point = self.sample();
        debug!(points = self.chart.len() + 1, "chart sample appended");
        self.chart.append(point);
        self.last_update = Some(Local::now());
    }
}
