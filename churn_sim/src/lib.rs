//! Churn Simulation Harness
//!
//! Runs the churn process against an in-memory orchestrator on a virtual
//! clock, so hours of churn finish in milliseconds and every run is
//! reproducible from one 64-bit seed:
//! - **Time**: [`SimContext`] advances only when the epoch loop or a hook sleeps
//! - **Participants**: [`SimLifecycle`] tracks who is running and injects
//!   refused kills, refused starts and slow actions
//! - **Randomness**: trial draws and fault draws come from separate streams
//!   of the master seed
//!
//! # Usage
//!
//! ```ignore
//! use churn_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_epochs(20_000).run(ScenarioId::SteadyState).await;
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod lifecycle;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{ChurnExport, ExportError};
pub use lifecycle::{LifecycleAction, LifecycleEvent, SimLifecycle};
pub use runner::{ChurnRun, ScenarioResult, ScenarioRunner, DEFAULT_EPOCHS};
