//! Error taxonomy for the churn process.

use churn_env::{HookError, NodeIndex};
use thiserror::Error;

/// Errors surfaced by calibration, configuration and the epoch scheduler.
///
/// Hook failures during epochs are *not* represented here: they are
/// absorbed by the scheduler and counted in the statistics.
#[derive(Debug, Error)]
pub enum ChurnError {
    /// A configuration field is out of its valid domain
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The failure-rate target cannot be reproduced with this group size
    /// and reconnection time
    #[error(
        "Infeasible target: {failure_rate_per_min} fail/min with {nodes} nodes and \
         lambda_r={lambda_r:.6}/s gives lambda_f={lambda_f}"
    )]
    InfeasibleTarget {
        nodes: usize,
        failure_rate_per_min: f64,
        lambda_r: f64,
        lambda_f: f64,
    },

    /// A per-epoch Bernoulli probability exceeds 1 under the reject policy
    #[error("{kind} probability {probability:.4} per epoch exceeds 1; shorten the epoch or use the clamp policy")]
    TrialProbabilityOutOfRange { kind: &'static str, probability: f64 },

    /// A statistics query ran before any epoch completed
    #[error("No epochs recorded yet")]
    NoEpochsRecorded,

    /// Bring-up of an initially-online node failed
    #[error("Bootstrap of {node} failed: {source}")]
    Bootstrap {
        node: NodeIndex,
        #[source]
        source: HookError,
    },

    /// The operation is not allowed in the current process state
    #[error("Operation not allowed while {0}")]
    InvalidState(&'static str),

    /// A background task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),

    /// A configuration file could not be parsed
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ChurnError {
    /// Creates an invalid-config error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Result alias for churn operations.
pub type ChurnResult<T> = Result<T, ChurnError>;
