//! Churn Core - Calibrated node-availability churn for fault injection
//!
//! This library drives start/stop actions against a group of N participants
//! so that the group as a whole sees a target failure rate and mean
//! reconnection time:
//! 1. **Calibration**: solve for the per-node failure intensity that
//!    reproduces a system-wide failure rate ([`ChurnRates`])
//! 2. **Scheduling**: a discrete-epoch Bernoulli approximation of the
//!    two-state process per node, calling lifecycle hooks on every
//!    transition ([`ChurnProcess`])
//! 3. **Statistics**: per-epoch series compared against the analytic
//!    expectation ([`ChurnStats`], [`ChurnReport`])
//!
//! # Usage
//!
//! ```ignore
//! use churn_core::{ChurnConfig, ChurnProcess};
//! use churn_env::{NoopLifecycle, TokioContext};
//!
//! let config = ChurnConfig::new(7, 5.0, 0.333333).with_seed(42);
//! let mut process = ChurnProcess::from_config(config, TokioContext::shared(), Arc::new(NoopLifecycle))?;
//!
//! process.run_simulation(None, true).await?;
//! // ... run the experiment
//! process.stop().await?;
//!
//! println!("expected {:.2} online, saw {:.2}", process.expected_online_nodes(), process.online_nodes()?);
//! ```

pub mod calibrator;
pub mod config;
pub mod error;
pub mod process;
pub mod signal;
pub mod stats;

// Re-export key types for convenience
pub use calibrator::{binomial, ChurnRates, TrialProbabilities};
pub use config::{ChurnConfig, TrialPolicy};
pub use error::{ChurnError, ChurnResult};
pub use process::{ChurnProcess, EpochOutcome, ProcessState};
pub use signal::StopSignal;
pub use stats::{ChurnReport, ChurnStats, EpochRecord, StatsHandle};
