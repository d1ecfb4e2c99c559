//! Scenario runner - executes churn scenarios on a virtual clock.

use crate::context::SimContext;
use crate::lifecycle::{LifecycleAction, LifecycleEvent, SimLifecycle};
use crate::scenarios::ScenarioId;

use churn_core::{ChurnConfig, ChurnProcess, ChurnReport, ChurnResult, ChurnStats, ProcessState};
use churn_env::{ChurnContext, NodeLifecycle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default epochs per scenario.
pub const DEFAULT_EPOCHS: u64 = 20_000;

/// Wall-clock budget for a free-running scenario to reach its epoch target.
const LOOP_DEADLINE: Duration = Duration::from_secs(60);

/// Everything one process run produced.
#[derive(Debug, Clone)]
pub struct ChurnRun {
    /// Configuration the process ran with
    pub config: ChurnConfig,

    /// Threshold the report was evaluated at
    pub threshold: usize,

    /// Expected versus observed figures
    pub report: ChurnReport,

    /// Per-epoch series and hook error counts
    pub stats: ChurnStats,

    /// Every start/kill the orchestrator saw
    pub events: Vec<LifecycleEvent>,

    /// Virtual time at the end of the run
    pub virtual_secs: f64,
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Epochs recorded
    pub epochs: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Run output; absent when the process could not be set up
    pub run: Option<ChurnRun>,
}

impl ScenarioResult {
    pub fn report(&self) -> Option<&ChurnReport> {
        self.run.as_ref().map(|run| &run.report)
    }
}

type Checked = ChurnResult<(ChurnRun, Vec<String>)>;

/// One process wired to a simulated orchestrator.
struct Harness {
    context: Arc<SimContext>,
    lifecycle: Arc<SimLifecycle>,
    process: ChurnProcess<SimContext>,
}

impl Harness {
    /// Process view and orchestrator view must agree whenever no epoch is
    /// in flight.
    fn views_agree(&self, failures: &mut Vec<String>) -> ChurnResult<()> {
        let process = self.process.node_states()?;
        let running = self.lifecycle.running();
        if process != running {
            failures.push(format!("process view {:?} != orchestrator view {:?}", process, running));
        }
        Ok(())
    }

    /// Waits on the wall clock until the background loop has recorded
    /// `target` epochs.
    async fn wait_for_epochs(&self, target: usize) -> bool {
        let stats = self.process.stats();
        let wait = async {
            while stats.epochs() < target {
                tokio::task::yield_now().await;
            }
        };
        tokio::time::timeout(LOOP_DEADLINE, wait).await.is_ok()
    }

    fn finish(self, threshold: usize) -> ChurnResult<ChurnRun> {
        let report = self.process.report(threshold)?;
        Ok(ChurnRun {
            config: self.process.config().clone(),
            threshold,
            report,
            stats: self.process.stats().snapshot(),
            events: self.lifecycle.events(),
            virtual_secs: self.context.now().as_secs_f64(),
        })
    }
}

/// 7 nodes, 5 failures/min, 20s mean reconnection.
fn steady_config() -> ChurnConfig {
    ChurnConfig::new(7, 5.0, 0.333333)
}

/// Five-sigma band for a mean over `epochs` correlated samples, where
/// `scale` is the one-epoch deviation inflated by the correlation time.
fn sampling_tolerance(epochs: u64, scale: f64) -> f64 {
    scale / (epochs.max(1) as f64).sqrt()
}

/// Runs churn scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Epochs per scenario
    epochs: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            epochs: DEFAULT_EPOCHS,
        }
    }

    /// Sets the number of epochs each scenario runs.
    pub fn with_epochs(mut self, epochs: u64) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn epochs(&self) -> u64 {
        self.epochs
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={}, epochs={})", scenario.name(), self.seed, self.epochs);

        let checked = match scenario {
            ScenarioId::SteadyState => self.run_steady_state().await,
            ScenarioId::Frozen => self.run_frozen().await,
            ScenarioId::FailingKillHook => self.run_failing_kill_hook().await,
            ScenarioId::FailingStartHook => self.run_failing_start_hook().await,
            ScenarioId::GracefulStop => self.run_graceful_stop().await,
            ScenarioId::ThresholdSweep => self.run_threshold_sweep().await,
            ScenarioId::SlowHooks => self.run_slow_hooks().await,
        };

        match checked {
            Ok((run, failures)) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: failures.is_empty(),
                epochs: run.stats.epochs(),
                failure_reason: (!failures.is_empty()).then(|| failures.join("; ")),
                run: Some(run),
            },
            Err(e) => {
                warn!("{} aborted: {}", scenario.name(), e);
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    epochs: 0,
                    failure_reason: Some(e.to_string()),
                    run: None,
                }
            }
        }
    }

    /// Dry or live bounded run of an arbitrary configuration.
    ///
    /// A zero config seed draws the trial stream from this runner's seed,
    /// so ad-hoc runs are reproducible too.
    pub async fn run_config(&self, config: ChurnConfig, threshold: usize, live: bool) -> ChurnResult<ChurnRun> {
        let mut harness = self.harness(config, |_| {})?;
        harness.process.run_simulation(Some(self.epochs), live).await?;
        harness.finish(threshold)
    }

    fn harness(&self, config: ChurnConfig, faults: impl FnOnce(&SimLifecycle)) -> ChurnResult<Harness> {
        let context = SimContext::shared(self.seed);
        let lifecycle = SimLifecycle::new(config.nodes, context.derive_rng(1));
        faults(&lifecycle);
        let lifecycle = Arc::new(lifecycle);
        Self::wire(context, lifecycle, config)
    }

    fn wire(context: Arc<SimContext>, lifecycle: Arc<SimLifecycle>, config: ChurnConfig) -> ChurnResult<Harness> {
        let hooks: Arc<dyn NodeLifecycle> = lifecycle.clone();
        let process = ChurnProcess::from_config(config, context.clone(), hooks)?;
        Ok(Harness {
            context,
            lifecycle,
            process,
        })
    }

    /// CHURN-001: SteadyState - observed averages converge on the model.
    ///
    /// **Assertion**: mean online count and failure rate within a
    /// five-sigma band of the analytic values.
    async fn run_steady_state(&self) -> Checked {
        info!("CHURN-001: SteadyState");
        let mut harness = self.harness(steady_config(), |_| {})?;
        harness.process.run_simulation(Some(self.epochs), false).await?;

        let mut failures = Vec::new();
        harness.views_agree(&mut failures)?;
        let run = harness.finish(3)?;
        let report = &run.report;

        let online_tol = sampling_tolerance(self.epochs, 32.0);
        if (report.actual_node_online - report.theoretical_node_online).abs() > online_tol {
            failures.push(format!(
                "mean online {:.3} vs expected {:.3} (tolerance {:.3})",
                report.actual_node_online, report.theoretical_node_online, online_tol
            ));
        }
        let rate_tol = sampling_tolerance(self.epochs, 87.0);
        if (report.actual_fail_per_min - report.theoretical_fail_per_min).abs() > rate_tol {
            failures.push(format!(
                "failure rate {:.3}/min vs target {:.3}/min (tolerance {:.3})",
                report.actual_fail_per_min, report.theoretical_fail_per_min, rate_tol
            ));
        }

        info!(
            "✓ SteadyState complete: online {:.3} (expected {:.3}), {:.3} fail/min",
            report.actual_node_online, report.theoretical_node_online, report.actual_fail_per_min
        );
        Ok((run, failures))
    }

    /// CHURN-002: Frozen - no failures, offline nodes may only come back.
    ///
    /// **Assertion**: zero kills, online count never decreases, expected
    /// online count equals N.
    async fn run_frozen(&self) -> Checked {
        info!("CHURN-002: Frozen");
        let config = ChurnConfig::new(30, 0.0, 99999.0)
            .with_epoch_duration(0.5)
            .with_initial_online(10);
        let mut harness = self.harness(config, |_| {})?;
        harness.process.run_simulation(Some(self.epochs), false).await?;

        let mut failures = Vec::new();
        harness.views_agree(&mut failures)?;
        if harness.process.expected_online_nodes() != 30.0 {
            failures.push(format!("expected online {} != 30", harness.process.expected_online_nodes()));
        }
        if harness.lifecycle.kill_attempts() != 0 {
            failures.push(format!("{} kills with zero failure rate", harness.lifecycle.kill_attempts()));
        }

        let run = harness.finish(10)?;
        let records = &run.stats.records;
        if records.iter().any(|r| r.failures > 0) || records.windows(2).any(|w| w[1].online < w[0].online) {
            failures.push("online count decreased".to_string());
        }

        info!("✓ Frozen complete: {} epochs, online {}", run.stats.epochs(), records.last().map(|r| r.online).unwrap_or(0));
        Ok((run, failures))
    }

    /// CHURN-003: FailingKillHook - refused kills leave the group intact.
    async fn run_failing_kill_hook(&self) -> Checked {
        info!("CHURN-003: FailingKillHook");
        let nodes = 6;
        let config = ChurnConfig::new(nodes, 4.0, 1.0).with_initial_online(nodes);
        let mut harness = self.harness(config, |sim| sim.set_failure_error_rate(1.0))?;
        harness.process.run_simulation(Some(self.epochs), false).await?;

        let mut failures = Vec::new();
        harness.views_agree(&mut failures)?;
        if harness.lifecycle.running_count() != nodes {
            failures.push(format!("{} of {} running", harness.lifecycle.running_count(), nodes));
        }

        let run = harness.finish(nodes)?;
        if run.stats.records.iter().any(|r| r.online as usize != nodes || r.failures > 0) {
            failures.push("a node went offline despite every kill failing".to_string());
        }
        // ~0.33 kill attempts per epoch at this rate
        if self.epochs >= 100 && run.stats.failed_failures == 0 {
            failures.push("no failed kills were counted".to_string());
        }

        info!("✓ FailingKillHook complete: {} refused kills", run.stats.failed_failures);
        Ok((run, failures))
    }

    /// CHURN-004: FailingStartHook - node 3 can never be started.
    async fn run_failing_start_hook(&self) -> Checked {
        info!("CHURN-004: FailingStartHook");
        let stuck = 3;
        let config = ChurnConfig::new(6, 4.0, 1.0).with_initial_online(3);
        let mut harness = self.harness(config, |sim| sim.fail_reconnects_for(&[stuck]))?;
        harness.process.run_simulation(Some(self.epochs), false).await?;

        let mut failures = Vec::new();
        harness.views_agree(&mut failures)?;
        if harness.lifecycle.is_running(stuck) {
            failures.push(format!("node {} is running", stuck));
        }

        let run = harness.finish(3)?;
        if run.stats.records.iter().any(|r| r.online > 5) {
            failures.push("more than 5 nodes online".to_string());
        }
        if run
            .events
            .iter()
            .any(|e| e.node.get() == stuck && e.action == LifecycleAction::Start && e.ok)
        {
            failures.push(format!("node {} started", stuck));
        }
        if self.epochs >= 100 && run.stats.failed_reconnections == 0 {
            failures.push("no failed starts were counted".to_string());
        }

        info!("✓ FailingStartHook complete: {} refused starts", run.stats.failed_reconnections);
        Ok((run, failures))
    }

    /// CHURN-005: GracefulStop - free-running loop, stopped from outside.
    ///
    /// **Assertion**: stop() joins the loop, no epoch is recorded after it
    /// returns, and the orchestrator agrees with the process.
    async fn run_graceful_stop(&self) -> Checked {
        info!("CHURN-005: GracefulStop");
        let mut harness = self.harness(steady_config(), |_| {})?;
        let target = self.epochs.max(1) as usize;

        harness.process.run_simulation(None, true).await?;
        let reached = harness.wait_for_epochs(target).await;
        harness.process.stop().await?;

        let mut failures = Vec::new();
        if !reached {
            failures.push(format!("loop did not reach {} epochs within {:?}", target, LOOP_DEADLINE));
        }
        if harness.process.state() != ProcessState::Stopped {
            failures.push(format!("state {:?} after stop", harness.process.state()));
        }

        let recorded = harness.process.stats().epochs();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        if harness.process.stats().epochs() != recorded {
            failures.push("epochs recorded after stop returned".to_string());
        }
        harness.views_agree(&mut failures)?;

        // Every recorded epoch but possibly the last was followed by a full sleep
        let virtual_secs = harness.context.now().as_secs_f64();
        if virtual_secs + 1.0 < recorded as f64 {
            failures.push(format!("{} epochs in only {:.1}s of virtual time", recorded, virtual_secs));
        }

        let run = harness.finish(3)?;
        info!("✓ GracefulStop complete: {} epochs over {:.0}s virtual", recorded, virtual_secs);
        Ok((run, failures))
    }

    /// CHURN-006: ThresholdSweep - observed time above T for every T.
    async fn run_threshold_sweep(&self) -> Checked {
        info!("CHURN-006: ThresholdSweep");
        let config = steady_config();
        let nodes = config.nodes;
        let mut harness = self.harness(config, |_| {})?;
        harness.process.run_simulation(Some(self.epochs), false).await?;

        let mut failures = Vec::new();
        let tolerance = sampling_tolerance(self.epochs, 14.0);
        for threshold in 0..=nodes + 1 {
            let expected = harness.process.expected_time_above_threshold(threshold);
            let actual = harness.process.time_above_threshold(threshold)?;
            debug!("  T={} expected={:.4} actual={:.4}", threshold, expected, actual);
            if (expected - actual).abs() > tolerance {
                failures.push(format!(
                    "T={}: time above {:.4} vs expected {:.4} (tolerance {:.4})",
                    threshold, actual, expected, tolerance
                ));
            }
        }

        let run = harness.finish(4)?;
        info!("✓ ThresholdSweep complete: {} thresholds checked", nodes + 2);
        Ok((run, failures))
    }

    /// CHURN-007: SlowHooks - actions take longer than an epoch.
    ///
    /// **Assertion**: the loop keeps going through overruns and virtual
    /// time runs ahead of the nominal epoch count.
    async fn run_slow_hooks(&self) -> Checked {
        info!("CHURN-007: SlowHooks");
        let context = SimContext::shared(self.seed);
        let config = steady_config();
        let lifecycle = Arc::new(
            SimLifecycle::new(config.nodes, context.derive_rng(1))
                .with_latency(context.clone(), Duration::from_secs(3)),
        );
        let mut harness = Self::wire(context, lifecycle, config)?;
        let target = self.epochs.max(1) as usize;

        harness.process.run_simulation(None, true).await?;
        let reached = harness.wait_for_epochs(target).await;
        harness.process.stop().await?;

        let mut failures = Vec::new();
        if !reached {
            failures.push(format!("loop did not reach {} epochs within {:?}", target, LOOP_DEADLINE));
        }
        harness.views_agree(&mut failures)?;

        let recorded = harness.process.stats().epochs();
        let virtual_secs = harness.context.now().as_secs_f64();
        if virtual_secs <= recorded as f64 {
            failures.push(format!(
                "{} epochs took {:.1}s; hook latency should push past the nominal epoch",
                recorded, virtual_secs
            ));
        }

        let run = harness.finish(3)?;
        info!("✓ SlowHooks complete: {} epochs over {:.0}s virtual", recorded, virtual_secs);
        Ok((run, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[tokio::test]
    async fn test_steady_state_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::SteadyState).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.epochs, DEFAULT_EPOCHS as usize);
        let report = result.report().unwrap();
        assert_relative_eq!(report.theoretical_fail_per_min, 5.0, epsilon = 1e-3);
    }

    #[tokio::test]
    async fn test_frozen_scenario() {
        let result = ScenarioRunner::new(42).with_epochs(2_000).run(ScenarioId::Frozen).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        let run = result.run.unwrap();
        assert_eq!(run.report.theoretical_node_online, 30.0);
        assert!(run.events.iter().all(|e| e.action == LifecycleAction::Start));
    }

    #[tokio::test]
    async fn test_failing_hook_scenarios() {
        let runner = ScenarioRunner::new(7).with_epochs(2_000);

        let kill = runner.run(ScenarioId::FailingKillHook).await;
        assert!(kill.passed, "{:?}", kill.failure_reason);
        assert!(kill.report().unwrap().failed_failures > 0);

        let start = runner.run(ScenarioId::FailingStartHook).await;
        assert!(start.passed, "{:?}", start.failure_reason);
        assert!(start.report().unwrap().has_hook_errors());
    }

    #[tokio::test]
    async fn test_graceful_stop_scenario() {
        let result = ScenarioRunner::new(42).with_epochs(3_000).run(ScenarioId::GracefulStop).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.epochs >= 3_000);
        assert!(result.run.unwrap().virtual_secs >= 2_999.0);
    }

    #[tokio::test]
    async fn test_threshold_sweep_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::ThresholdSweep).await;
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[tokio::test]
    async fn test_slow_hooks_scenario() {
        let result = ScenarioRunner::new(42).with_epochs(2_000).run(ScenarioId::SlowHooks).await;
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[tokio::test]
    async fn test_same_seed_same_series() {
        let runner = ScenarioRunner::new(1234).with_epochs(1_000);

        let a = runner.run(ScenarioId::SteadyState).await.run.unwrap();
        let b = runner.run(ScenarioId::SteadyState).await.run.unwrap();

        assert_eq!(a.stats.records, b.stats.records);
        // Bring-up starts run concurrently; trial actions after them are ordered
        let bootstrap = 5;
        assert_eq!(a.events.len(), b.events.len());
        assert_eq!(a.events[bootstrap..], b.events[bootstrap..]);
    }

    #[tokio::test]
    async fn test_infeasible_config_aborts() {
        let runner = ScenarioRunner::new(1).with_epochs(10);
        assert!(runner.run_config(ChurnConfig::new(7, 10.0, 1.0), 3, false).await.is_err());

        let run = runner.run_config(steady_config(), 3, true).await.unwrap();
        assert_eq!(run.stats.epochs(), 10);
        // Live bounded epochs sleep the full duration on the virtual clock
        assert_relative_eq!(run.virtual_secs, 10.0, epsilon = 1e-6);
    }
}
