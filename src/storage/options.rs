use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::metrics::GraphMetrics;
use crate::error::{GraphError, Result};

/// Configuration options supplied when opening a [`crate::Database`].
#[derive(Clone)]
pub struct GraphOptions {
    /// Maximum number of count jobs folded into one reconciliation commit.
    pub count_job_batch_size: usize,
    /// Whether a background thread drains the count-job log.
    pub background_reconcile: bool,
    /// Interval between background reconciliation passes.
    pub reconcile_interval: Duration,
    /// How long a label lock acquisition waits before failing.
    pub label_lock_timeout: Duration,
    /// Whether the durable log is fsynced on every commit.
    pub sync_on_commit: bool,
    /// Optional metrics collection implementation.
    pub metrics: Option<Arc<dyn GraphMetrics>>,
}

impl std::fmt::Debug for GraphOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphOptions")
            .field("count_job_batch_size", &self.count_job_batch_size)
            .field("background_reconcile", &self.background_reconcile)
            .field("reconcile_interval", &self.reconcile_interval)
            .field("label_lock_timeout", &self.label_lock_timeout)
            .field("sync_on_commit", &self.sync_on_commit)
            .field("metrics", &self.metrics.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            count_job_batch_size: 10_000,
            background_reconcile: true,
            reconcile_interval: Duration::from_secs(1),
            label_lock_timeout: Duration::from_secs(10),
            sync_on_commit: true,
            metrics: None,
        }
    }
}

impl GraphOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reconciliation batch size.
    pub fn count_job_batch_size(mut self, jobs: usize) -> Self {
        self.count_job_batch_size = jobs;
        self
    }

    /// Enables or disables the background reconciliation thread.
    pub fn background_reconcile(mut self, enabled: bool) -> Self {
        self.background_reconcile = enabled;
        self
    }

    /// Sets the interval between background reconciliation passes.
    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Sets the label lock timeout.
    pub fn label_lock_timeout(mut self, timeout: Duration) -> Self {
        self.label_lock_timeout = timeout;
        self
    }

    /// Enables or disables fsync on commit for durable stores.
    pub fn sync_on_commit(mut self, enabled: bool) -> Self {
        self.sync_on_commit = enabled;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn GraphMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parses options from a TOML document.
    ///
    /// Missing keys keep their defaults and unknown keys are rejected.
    /// Durations are given in milliseconds (`reconcile_interval_ms`,
    /// `label_lock_timeout_ms`).
    pub fn from_toml_str(doc: &str) -> Result<Self> {
        let file: OptionsFile =
            toml::from_str(doc).map_err(|err| GraphError::Config(err.to_string()))?;
        file.apply(Self::default())
    }

    /// Reads and parses a TOML options file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let doc = std::fs::read_to_string(path)
            .map_err(|err| GraphError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&doc)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.count_job_batch_size == 0 {
            return Err(GraphError::Config(
                "count_job_batch_size must be at least 1".into(),
            ));
        }
        if self.reconcile_interval.is_zero() {
            return Err(GraphError::Config(
                "reconcile_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionsFile {
    count_job_batch_size: Option<usize>,
    background_reconcile: Option<bool>,
    reconcile_interval_ms: Option<u64>,
    label_lock_timeout_ms: Option<u64>,
    sync_on_commit: Option<bool>,
}

impl OptionsFile {
    fn apply(self, mut opts: GraphOptions) -> Result<GraphOptions> {
        if let Some(jobs) = self.count_job_batch_size {
            opts.count_job_batch_size = jobs;
        }
        if let Some(enabled) = self.background_reconcile {
            opts.background_reconcile = enabled;
        }
        if let Some(ms) = self.reconcile_interval_ms {
            opts.reconcile_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.label_lock_timeout_ms {
            opts.label_lock_timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = self.sync_on_commit {
            opts.sync_on_commit = enabled;
        }
        opts.validate()?;
        Ok(opts)
    }
}
