//! Core environment context trait for the churn engine.

use async_trait::async_trait;
use std::time::Duration;

use crate::ChurnRng;

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the epoch scheduler can
/// run against live infrastructure or inside a virtual-time simulation.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, OS entropy
/// - **Simulation**: `SimContext` (in `churn_sim`) - virtual clock, seeded RNG
///
/// # Determinism
///
/// For simulation, all methods that would normally introduce non-determinism
/// (time, randomness) are controlled by the implementation.
#[async_trait]
pub trait ChurnContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used to measure how long an epoch actually took.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Derives a random generator for the given stream.
    ///
    /// Distinct streams give independent sequences. In simulation the
    /// sequence is a pure function of `(seed, stream)`.
    fn derive_rng(&self, stream: u64) -> ChurnRng;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
