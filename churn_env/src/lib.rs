//! Churn Environment Abstraction Layer
//!
//! This crate provides the seams that let the churn process run against
//! both **Production** (tokio, real participants) and **Simulation**
//! (virtual clock, in-memory participants) environments.
//!
//! # Core Concept
//!
//! The churn engine never touches the outside world directly. Everything
//! it needs goes through two traits:
//! - Time and randomness (`now()`, `sleep()`, `derive_rng()`) via [`ChurnContext`]
//! - Participant start/stop actions via [`NodeLifecycle`]
//!
//! By deriving all entropy from a single 64-bit seed, any run becomes
//! reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use churn_env::{ChurnContext, NodeLifecycle, NodeIndex};
//!
//! async fn bring_up<Ctx: ChurnContext>(ctx: &Ctx, hooks: &dyn NodeLifecycle) {
//!     for i in 1..4 {
//!         hooks.on_reconnect(NodeIndex(i)).await.ok();
//!         ctx.sleep(Duration::from_millis(100)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod lifecycle;
mod tokio_impl;
mod types;

pub use context::ChurnContext;
pub use error::HookError;
pub use lifecycle::{NodeLifecycle, NoopLifecycle};
pub use tokio_impl::TokioContext;
pub use types::NodeIndex;

/// RNG type handed to the churn engine.
///
/// ChaCha8 is cheap and stream-stable across platforms, so a seed
/// reproduces the same trial sequence everywhere.
pub type ChurnRng = rand_chacha::ChaCha8Rng;
