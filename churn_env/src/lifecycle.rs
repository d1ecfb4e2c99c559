//! Participant lifecycle abstraction for the churn engine.

use async_trait::async_trait;

use crate::error::HookError;
use crate::types::NodeIndex;

/// Abstraction for the external start/stop actions driven by churn.
///
/// # Implementations
///
/// - **Production**: Kills/starts a container, process or remote host
/// - **Simulation**: In-memory participant table with fault injection
/// - **Dry run**: [`NoopLifecycle`]
///
/// # Call Flow
///
/// ```text
/// Epoch scheduler              Lifecycle                 Participant
///   |                             |                          |
///   |-- on_failure(i) ----------->|                          |
///   |                             |-- stop ----------------->|
///   |<-- Ok(()) ------------------|                          |
///   |   (node i marked offline)   |                          |
/// ```
///
/// Hooks are awaited to completion before the next trial runs, and the
/// engine never calls two hooks for the same node concurrently.
#[async_trait]
pub trait NodeLifecycle: Send + Sync + 'static {
    /// Stops participant `node`.
    ///
    /// # Returns
    /// * `Ok(())` - The participant is down; the engine marks it offline
    /// * `Err(HookError)` - Nothing changed; the engine keeps it online
    async fn on_failure(&self, node: NodeIndex) -> Result<(), HookError>;

    /// Starts participant `node`.
    ///
    /// Also used once per initially-online node during bootstrap.
    async fn on_reconnect(&self, node: NodeIndex) -> Result<(), HookError>;
}

/// Lifecycle that does nothing and always succeeds.
///
/// Used for dry runs and analytic-only experiments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLifecycle;

#[async_trait]
impl NodeLifecycle for NoopLifecycle {
    async fn on_failure(&self, _node: NodeIndex) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_reconnect(&self, _node: NodeIndex) -> Result<(), HookError> {
        Ok(())
    }
}
