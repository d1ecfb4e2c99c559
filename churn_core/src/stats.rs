//! Epoch statistics and the expected-vs-observed report.
//!
//! The epoch loop is the only writer. Any task may read through a
//! [`StatsHandle`]; each append happens under a write lock, so a reader
//! observes either the series before an epoch or after it, never a
//! half-recorded entry.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

use crate::calibrator::ChurnRates;
use crate::error::{ChurnError, ChurnResult};

/// Outcome of one completed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Nodes that went offline this epoch
    pub failures: u32,

    /// Nodes that came back this epoch
    pub reconnections: u32,

    /// Online nodes at epoch end, anchor included
    pub online: u32,
}

/// Accumulated statistics for one churn process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChurnStats {
    /// Per-epoch records in completion order
    pub records: Vec<EpochRecord>,

    /// Failure hooks that returned an error
    pub failed_failures: u64,

    /// Reconnect hooks that returned an error
    pub failed_reconnections: u64,
}

impl ChurnStats {
    /// Number of recorded epochs.
    pub fn epochs(&self) -> usize {
        self.records.len()
    }

    fn non_empty(&self) -> ChurnResult<f64> {
        match self.records.len() {
            0 => Err(ChurnError::NoEpochsRecorded),
            n => Ok(n as f64),
        }
    }

    /// Mean online count across recorded epochs.
    pub fn mean_online(&self) -> ChurnResult<f64> {
        let n = self.non_empty()?;
        Ok(self.records.iter().map(|r| r.online as f64).sum::<f64>() / n)
    }

    /// Fraction of recorded epochs with at least `threshold` nodes online.
    pub fn time_above_threshold(&self, threshold: usize) -> ChurnResult<f64> {
        let n = self.non_empty()?;
        let above = self
            .records
            .iter()
            .filter(|r| r.online as usize >= threshold)
            .count();
        Ok(above as f64 / n)
    }

    /// Mean failures per epoch.
    pub fn avg_failures_per_epoch(&self) -> ChurnResult<f64> {
        let n = self.non_empty()?;
        Ok(self.records.iter().map(|r| r.failures as f64).sum::<f64>() / n)
    }

    /// Mean reconnections per epoch.
    pub fn avg_reconnections_per_epoch(&self) -> ChurnResult<f64> {
        let n = self.non_empty()?;
        Ok(self.records.iter().map(|r| r.reconnections as f64).sum::<f64>() / n)
    }

    /// Observed failures per minute for epochs of `epoch_secs`.
    pub fn failures_per_min(&self, epoch_secs: f64) -> ChurnResult<f64> {
        Ok(self.avg_failures_per_epoch()? / epoch_secs * 60.0)
    }

    /// Observed reconnections per minute for epochs of `epoch_secs`.
    pub fn reconnections_per_min(&self, epoch_secs: f64) -> ChurnResult<f64> {
        Ok(self.avg_reconnections_per_epoch()? / epoch_secs * 60.0)
    }
}

/// Shared, lock-guarded view of a process's statistics.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle {
    inner: Arc<RwLock<ChurnStats>>,
}

impl StatsHandle {
    /// Creates an empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the current statistics.
    pub fn read<R>(&self, f: impl FnOnce(&ChurnStats) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Returns a copy of the current statistics.
    pub fn snapshot(&self) -> ChurnStats {
        self.read(Clone::clone)
    }

    /// Number of recorded epochs.
    pub fn epochs(&self) -> usize {
        self.read(ChurnStats::epochs)
    }

    pub fn mean_online(&self) -> ChurnResult<f64> {
        self.read(ChurnStats::mean_online)
    }

    pub fn time_above_threshold(&self, threshold: usize) -> ChurnResult<f64> {
        self.read(|s| s.time_above_threshold(threshold))
    }

    pub fn avg_failures_per_epoch(&self) -> ChurnResult<f64> {
        self.read(ChurnStats::avg_failures_per_epoch)
    }

    pub fn avg_reconnections_per_epoch(&self) -> ChurnResult<f64> {
        self.read(ChurnStats::avg_reconnections_per_epoch)
    }

    pub fn failures_per_min(&self, epoch_secs: f64) -> ChurnResult<f64> {
        self.read(|s| s.failures_per_min(epoch_secs))
    }

    pub fn reconnections_per_min(&self, epoch_secs: f64) -> ChurnResult<f64> {
        self.read(|s| s.reconnections_per_min(epoch_secs))
    }

    /// Failure hooks that returned an error.
    pub fn failed_failures(&self) -> u64 {
        self.read(|s| s.failed_failures)
    }

    /// Reconnect hooks that returned an error.
    pub fn failed_reconnections(&self) -> u64 {
        self.read(|s| s.failed_reconnections)
    }

    pub(crate) fn record(&self, record: EpochRecord) {
        self.write(|s| s.records.push(record));
    }

    pub(crate) fn count_failed_failure(&self) {
        self.write(|s| s.failed_failures += 1);
    }

    pub(crate) fn count_failed_reconnection(&self) {
        self.write(|s| s.failed_reconnections += 1);
    }

    fn write(&self, f: impl FnOnce(&mut ChurnStats)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

/// Expected versus observed figures for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnReport {
    pub nodes: usize,
    pub threshold: usize,
    pub lambda_f: f64,
    pub lambda_r: f64,
    pub epoch_duration_secs: f64,
    pub epochs: usize,

    pub theoretical_node_online: f64,
    pub theoretical_time_above_thresh: f64,
    pub theoretical_fail_per_min: f64,

    pub actual_node_online: f64,
    pub actual_time_above_thresh: f64,
    pub actual_fail_per_min: f64,
    pub actual_rec_per_min: f64,

    pub failed_failures: u64,
    pub failed_reconnections: u64,
}

impl ChurnReport {
    /// Builds a report; fails if no epoch was recorded.
    pub fn new(
        rates: &ChurnRates,
        stats: &ChurnStats,
        epoch_duration_secs: f64,
        threshold: usize,
    ) -> ChurnResult<Self> {
        Ok(Self {
            nodes: rates.nodes,
            threshold,
            lambda_f: rates.lambda_f,
            lambda_r: rates.lambda_r,
            epoch_duration_secs,
            epochs: stats.epochs(),
            theoretical_node_online: rates.expected_online_count(),
            theoretical_time_above_thresh: rates.expected_time_above_threshold(threshold),
            theoretical_fail_per_min: rates.expected_failure_rate_per_min(),
            actual_node_online: stats.mean_online()?,
            actual_time_above_thresh: stats.time_above_threshold(threshold)?,
            actual_fail_per_min: stats.failures_per_min(epoch_duration_secs)?,
            actual_rec_per_min: stats.reconnections_per_min(epoch_duration_secs)?,
            failed_failures: stats.failed_failures,
            failed_reconnections: stats.failed_reconnections,
        })
    }

    /// True if any hook reported an error during the run.
    pub fn has_hook_errors(&self) -> bool {
        self.failed_failures > 0 || self.failed_reconnections > 0
    }
}
