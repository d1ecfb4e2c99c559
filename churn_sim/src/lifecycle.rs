//! Simulated participant orchestrator with fault injection.

use async_trait::async_trait;
use churn_env::{ChurnContext, ChurnRng, HookError, NodeIndex, NodeLifecycle};
use rand::Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::context::SimContext;

/// Kind of lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Kill,
    Start,
}

/// One attempted action, stamped with virtual time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub time_secs: f64,
    pub node: NodeIndex,
    pub action: LifecycleAction,
    pub ok: bool,
}

/// Injected faults.
#[derive(Debug, Clone, Default)]
struct FaultPlan {
    /// Kills on these nodes always fail
    kill_fail_nodes: HashSet<usize>,

    /// Starts on these nodes always fail
    start_fail_nodes: HashSet<usize>,

    /// Probability any kill fails (0.0 - 1.0)
    kill_error_rate: f64,

    /// Probability any start fails (0.0 - 1.0)
    start_error_rate: f64,
}

/// In-memory stand-in for the container orchestrator.
///
/// Tracks which participants are actually running, so tests can check
/// that the churn process's view and the "real" system agree.
pub struct SimLifecycle {
    /// Running flag per participant
    running: Mutex<Vec<bool>>,

    /// Injected faults
    faults: Mutex<FaultPlan>,

    /// Draws for probabilistic faults and latency
    rng: Mutex<ChurnRng>,

    /// Virtual clock and action latency distribution
    latency: Option<(Arc<SimContext>, Exp<f64>)>,

    /// Actions slower than this give up with a timeout
    timeout: Option<Duration>,

    /// Action log
    events: Mutex<Vec<LifecycleEvent>>,

    kill_attempts: AtomicU64,
    start_attempts: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimLifecycle {
    /// Creates an orchestrator for `nodes` participants, none running.
    pub fn new(nodes: usize, rng: ChurnRng) -> Self {
        Self {
            running: Mutex::new(vec![false; nodes]),
            faults: Mutex::new(FaultPlan::default()),
            rng: Mutex::new(rng),
            latency: None,
            timeout: None,
            events: Mutex::new(Vec::new()),
            kill_attempts: AtomicU64::new(0),
            start_attempts: AtomicU64::new(0),
        }
    }

    /// Makes every action take an exponentially distributed amount of
    /// virtual time with the given mean.
    pub fn with_latency(mut self, context: Arc<SimContext>, mean: Duration) -> Self {
        let mean_secs = mean.as_secs_f64();
        self.latency = if mean_secs > 0.0 {
            Exp::new(1.0 / mean_secs).ok().map(|exp| (context, exp))
        } else {
            None
        };
        self
    }

    /// Abandons any action whose latency exceeds `limit`.
    ///
    /// The action waits out the limit, leaves the participant untouched and
    /// reports [`HookError::Timeout`]. Has no effect without latency.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Kills on these nodes fail until healed.
    pub fn fail_failures_for(&self, nodes: &[usize]) {
        lock(&self.faults).kill_fail_nodes.extend(nodes.iter().copied());
    }

    /// Starts on these nodes fail until healed.
    pub fn fail_reconnects_for(&self, nodes: &[usize]) {
        lock(&self.faults).start_fail_nodes.extend(nodes.iter().copied());
    }

    /// Sets the probability that any kill fails.
    pub fn set_failure_error_rate(&self, rate: f64) {
        lock(&self.faults).kill_error_rate = rate.clamp(0.0, 1.0);
    }

    /// Sets the probability that any start fails.
    pub fn set_reconnect_error_rate(&self, rate: f64) {
        lock(&self.faults).start_error_rate = rate.clamp(0.0, 1.0);
    }

    /// Removes all injected faults.
    pub fn heal_all(&self) {
        *lock(&self.faults) = FaultPlan::default();
    }

    /// Returns true if the participant is running.
    pub fn is_running(&self, node: usize) -> bool {
        lock(&self.running).get(node).copied().unwrap_or(false)
    }

    /// Number of running participants.
    pub fn running_count(&self) -> usize {
        lock(&self.running).iter().filter(|r| **r).count()
    }

    /// Snapshot of running flags.
    pub fn running(&self) -> Vec<bool> {
        lock(&self.running).clone()
    }

    pub fn kill_attempts(&self) -> u64 {
        self.kill_attempts.load(Ordering::SeqCst)
    }

    pub fn start_attempts(&self) -> u64 {
        self.start_attempts.load(Ordering::SeqCst)
    }

    /// Action log in call order.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        lock(&self.events).clone()
    }

    /// Waits out the action's latency, or the timeout if that comes first.
    async fn simulate_latency(&self, node: NodeIndex, action: LifecycleAction) -> Result<(), HookError> {
        let Some((context, exp)) = &self.latency else {
            return Ok(());
        };
        let delay = Duration::from_secs_f64(exp.sample(&mut *lock(&self.rng)));
        match self.timeout {
            Some(limit) if delay > limit => {
                context.sleep(limit).await;
                self.log(node, action, false);
                Err(HookError::Timeout {
                    node,
                    millis: limit.as_millis() as u64,
                })
            }
            _ => {
                context.sleep(delay).await;
                Ok(())
            }
        }
    }

    fn injected(&self, node: NodeIndex, action: LifecycleAction) -> bool {
        let faults = lock(&self.faults);
        let (pinned, rate) = match action {
            LifecycleAction::Kill => (faults.kill_fail_nodes.contains(&node.get()), faults.kill_error_rate),
            LifecycleAction::Start => (faults.start_fail_nodes.contains(&node.get()), faults.start_error_rate),
        };
        pinned || (rate > 0.0 && lock(&self.rng).gen::<f64>() < rate)
    }

    fn log(&self, node: NodeIndex, action: LifecycleAction, ok: bool) {
        let time_secs = self
            .latency
            .as_ref()
            .map(|(context, _)| context.now().as_secs_f64())
            .unwrap_or(0.0);
        lock(&self.events).push(LifecycleEvent {
            time_secs,
            node,
            action,
            ok,
        });
    }

    fn apply(&self, node: NodeIndex, action: LifecycleAction) -> Result<(), HookError> {
        if self.injected(node, action) {
            self.log(node, action, false);
            return Err(HookError::action(node, format!("injected {:?} failure", action)));
        }

        let mut running = lock(&self.running);
        let slot = running
            .get_mut(node.get())
            .ok_or_else(|| HookError::unreachable(node))?;
        let result = match action {
            LifecycleAction::Kill if !*slot => Err(HookError::action(node, "not running")),
            LifecycleAction::Kill => {
                *slot = false;
                Ok(())
            }
            // Starting a running participant is a no-op, like `docker start`
            LifecycleAction::Start => {
                *slot = true;
                Ok(())
            }
        };
        drop(running);

        self.log(node, action, result.is_ok());
        result
    }
}

#[async_trait]
impl NodeLifecycle for SimLifecycle {
    async fn on_failure(&self, node: NodeIndex) -> Result<(), HookError> {
        self.kill_attempts.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency(node, LifecycleAction::Kill).await?;
        self.apply(node, LifecycleAction::Kill)
    }

    async fn on_reconnect(&self, node: NodeIndex) -> Result<(), HookError> {
        self.start_attempts.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency(node, LifecycleAction::Start).await?;
        self.apply(node, LifecycleAction::Start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn lifecycle(nodes: usize) -> SimLifecycle {
        SimLifecycle::new(nodes, ChurnRng::seed_from_u64(7))
    }

    #[tokio::test]
    async fn test_start_then_kill() {
        let sim = lifecycle(3);
        sim.on_reconnect(NodeIndex(1)).await.unwrap();
        assert!(sim.is_running(1));
        assert_eq!(sim.running_count(), 1);

        sim.on_failure(NodeIndex(1)).await.unwrap();
        assert!(!sim.is_running(1));
        assert_eq!(sim.kill_attempts(), 1);
        assert_eq!(sim.start_attempts(), 1);
    }

    #[tokio::test]
    async fn test_kill_of_stopped_participant_fails() {
        let sim = lifecycle(3);
        let err = sim.on_failure(NodeIndex(2)).await.unwrap_err();
        assert_eq!(err.node(), NodeIndex(2));
    }

    #[tokio::test]
    async fn test_out_of_range_is_unreachable() {
        let sim = lifecycle(3);
        let err = sim.on_reconnect(NodeIndex(9)).await.unwrap_err();
        assert_eq!(err, HookError::unreachable(NodeIndex(9)));
    }

    #[tokio::test]
    async fn test_pinned_faults_and_heal() {
        let sim = lifecycle(4);
        sim.fail_reconnects_for(&[2]);
        assert!(sim.on_reconnect(NodeIndex(2)).await.is_err());
        assert!(!sim.is_running(2));

        sim.heal_all();
        assert!(sim.on_reconnect(NodeIndex(2)).await.is_ok());
        assert!(sim.is_running(2));

        let events = sim.events();
        assert_eq!(events.len(), 2);
        assert!(!events[0].ok);
        assert!(events[1].ok);
    }

    #[tokio::test]
    async fn test_pinned_kill_leaves_participant_running() {
        let sim = lifecycle(3);
        sim.on_reconnect(NodeIndex(1)).await.unwrap();
        sim.fail_failures_for(&[1]);

        let err = sim.on_failure(NodeIndex(1)).await.unwrap_err();
        assert!(matches!(err, HookError::Action { node: NodeIndex(1), .. }));
        assert!(sim.is_running(1));

        sim.heal_all();
        sim.on_failure(NodeIndex(1)).await.unwrap();
        assert!(!sim.is_running(1));
        assert_eq!(sim.kill_attempts(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_error_rate_one_always_fails() {
        let sim = lifecycle(3);
        sim.set_reconnect_error_rate(1.0);
        for _ in 0..10 {
            assert!(sim.on_reconnect(NodeIndex(2)).await.is_err());
        }
        assert_eq!(sim.running_count(), 0);
        assert_eq!(sim.start_attempts(), 10);
        assert!(sim.events().iter().all(|e| !e.ok));
    }

    #[tokio::test]
    async fn test_error_rate_one_always_fails() {
        let sim = lifecycle(4);
        sim.on_reconnect(NodeIndex(1)).await.unwrap();
        sim.set_failure_error_rate(1.0);
        for _ in 0..10 {
            assert!(sim.on_failure(NodeIndex(1)).await.is_err());
        }
        assert!(sim.is_running(1));
    }

    #[tokio::test]
    async fn test_latency_advances_virtual_clock() {
        let ctx = SimContext::shared(1);
        let sim = lifecycle(2).with_latency(ctx.clone(), Duration::from_millis(200));

        for _ in 0..50 {
            sim.on_reconnect(NodeIndex(1)).await.unwrap();
        }
        assert!(ctx.now() > Duration::ZERO);
        assert!(sim.events().last().unwrap().time_secs > 0.0);
    }

    #[tokio::test]
    async fn test_slow_action_times_out() {
        let ctx = SimContext::shared(1);
        let limit = Duration::from_nanos(1);
        let sim = lifecycle(2)
            .with_latency(ctx.clone(), Duration::from_secs(1))
            .with_timeout(limit);

        let err = sim.on_reconnect(NodeIndex(1)).await.unwrap_err();
        assert_eq!(err, HookError::Timeout { node: NodeIndex(1), millis: 0 });
        assert!(!sim.is_running(1));
        assert_eq!(sim.start_attempts(), 1);

        let events = sim.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].ok);
        assert!(ctx.now() >= limit);
    }

    #[tokio::test]
    async fn test_generous_timeout_lets_actions_through() {
        let ctx = SimContext::shared(1);
        let sim = lifecycle(2)
            .with_latency(ctx.clone(), Duration::from_millis(10))
            .with_timeout(Duration::from_secs(3600));

        sim.on_reconnect(NodeIndex(1)).await.unwrap();
        assert!(sim.is_running(1));
    }
}
