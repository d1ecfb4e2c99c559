//! Epoch Scheduler - drives the churn process against lifecycle hooks.
//!
//! # Lifecycle
//!
//! ```text
//!            run_simulation(None)             stop()
//!   Idle ───────────────────────────► Running ───────► Stopped
//!    │ ▲
//!    └─┘ run_simulation(Some(n))  (bounded, on the caller's task)
//! ```
//!
//! Each epoch gives every non-anchor node one Bernoulli trial, in index
//! order: online nodes against `λf·epoch`, offline nodes against
//! `λr·epoch`. A successful trial calls the matching hook and flips the
//! node only once the hook returns `Ok`.

use churn_env::{ChurnContext, ChurnRng, HookError, NodeIndex, NodeLifecycle};
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::calibrator::{ChurnRates, TrialProbabilities};
use crate::config::ChurnConfig;
use crate::error::{ChurnError, ChurnResult};
use crate::signal::StopSignal;
use crate::stats::{ChurnReport, EpochRecord, StatsHandle};

/// Where a process is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Constructed, no background loop
    Idle,

    /// Free-running loop active on a background task
    Running,

    /// Stop observed and loop exited (terminal)
    Stopped,
}

impl ProcessState {
    fn name(&self) -> &'static str {
        match self {
            ProcessState::Idle => "idle",
            ProcessState::Running => "running",
            ProcessState::Stopped => "stopped",
        }
    }
}

/// Result of one trial pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochOutcome {
    /// Every node was tried
    Completed { failures: u32, reconnections: u32 },

    /// Stop was observed mid-pass; transitions already applied stand
    Interrupted,
}

impl EpochOutcome {
    /// `(failures, reconnections)`; `(0, 0)` for an interrupted pass.
    pub fn counts(&self) -> (u32, u32) {
        match self {
            EpochOutcome::Completed { failures, reconnections } => (*failures, *reconnections),
            EpochOutcome::Interrupted => (0, 0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Failure,
    Reconnection,
}

/// State owned by whichever task is currently running epochs.
struct EpochEngine {
    /// Online flag per slot; slot 0 is always true
    nodes: Vec<bool>,
    probabilities: TrialProbabilities,
    rng: ChurnRng,
    hooks: Arc<dyn NodeLifecycle>,
    stop: StopSignal,
    stats: StatsHandle,
    online: Arc<AtomicUsize>,
}

impl EpochEngine {
    async fn run_epoch(&mut self) -> EpochOutcome {
        let mut failures = 0;
        let mut reconnections = 0;

        for i in 1..self.nodes.len() {
            if self.stop.is_triggered() {
                return EpochOutcome::Interrupted;
            }
            let node = NodeIndex(i);
            let draw: f64 = self.rng.gen();

            if self.nodes[i] {
                if draw < self.probabilities.failure {
                    info!("failing {}, online={}/{}", node, self.online_count(), self.nodes.len());
                    match self.hooks.on_failure(node).await {
                        Ok(()) => {
                            self.nodes[i] = false;
                            self.online.fetch_sub(1, Ordering::SeqCst);
                            failures += 1;
                        }
                        Err(e) => self.hook_failed(Transition::Failure, e),
                    }
                }
            } else if draw < self.probabilities.reconnection {
                info!("reconnecting {}, online={}/{}", node, self.online_count(), self.nodes.len());
                match self.hooks.on_reconnect(node).await {
                    Ok(()) => {
                        self.nodes[i] = true;
                        self.online.fetch_add(1, Ordering::SeqCst);
                        reconnections += 1;
                    }
                    Err(e) => self.hook_failed(Transition::Reconnection, e),
                }
            }
        }

        // Hooks racing a shutdown are expected to fail
        if self.stop.is_triggered() {
            return EpochOutcome::Interrupted;
        }
        EpochOutcome::Completed { failures, reconnections }
    }

    fn hook_failed(&self, transition: Transition, error: HookError) {
        if self.stop.is_triggered() {
            debug!("ignoring {:?} hook error after stop: {}", transition, error);
            return;
        }
        warn!("{:?} hook failed: {}", transition, error);
        match transition {
            Transition::Failure => self.stats.count_failed_failure(),
            Transition::Reconnection => self.stats.count_failed_reconnection(),
        }
    }

    fn online_count(&self) -> usize {
        self.online.load(Ordering::SeqCst)
    }

    /// Appends a completed epoch.
    ///
    /// An interrupted pass is dropped rather than appended as a
    /// zero-count entry, so every record covers a full trial pass.
    fn record(&self, outcome: EpochOutcome) {
        if let EpochOutcome::Completed { failures, reconnections } = outcome {
            self.stats.record(EpochRecord {
                failures,
                reconnections,
                online: self.online_count() as u32,
            });
        }
    }

    async fn run_loop<C: ChurnContext>(mut self, context: Arc<C>, epoch: Duration, live: bool) -> Self {
        while !self.stop.is_triggered() {
            let started = context.now();
            let outcome = self.run_epoch().await;
            self.record(outcome);

            let elapsed = context.now().saturating_sub(started);
            if elapsed < epoch {
                if live {
                    let stop = self.stop.clone();
                    tokio::select! {
                        _ = context.sleep(epoch - elapsed) => {}
                        _ = stop.triggered() => {}
                    }
                } else {
                    tokio::task::yield_now().await;
                }
            } else {
                warn!(
                    "epoch time {:.2}s longer than epoch duration {:.2}s",
                    elapsed.as_secs_f64(),
                    epoch.as_secs_f64()
                );
                tokio::task::yield_now().await;
            }
        }
        debug!("epoch loop exited after {} epochs", self.stats.epochs());
        self
    }
}

/// A churn process over one group of nodes.
///
/// Generic over the environment context so the same process drives live
/// participants under tokio or a virtual-clock simulation.
pub struct ChurnProcess<C: ChurnContext> {
    config: ChurnConfig,
    rates: ChurnRates,
    context: Arc<C>,
    hooks: Arc<dyn NodeLifecycle>,

    /// Present unless the background loop owns it
    engine: Option<EpochEngine>,
    task: Option<JoinHandle<EpochEngine>>,

    stop: StopSignal,
    stats: StatsHandle,
    online: Arc<AtomicUsize>,
    state: ProcessState,
    bootstrapped: bool,
}

impl<C: ChurnContext> ChurnProcess<C> {
    /// Creates a process with an explicit trial RNG.
    ///
    /// Calibration and trial-probability errors surface here, before any
    /// hook is called.
    pub fn new(
        config: ChurnConfig,
        context: Arc<C>,
        hooks: Arc<dyn NodeLifecycle>,
        rng: ChurnRng,
    ) -> ChurnResult<Self> {
        config.validate()?;
        let rates = ChurnRates::calibrate(
            config.nodes,
            config.system_failure_rate_per_min,
            config.avg_reconnection_time_min,
        )?;
        let probabilities = rates.trial_probabilities(config.epoch_duration_secs, config.trial_policy)?;

        let initial_online = config
            .initial_online
            .unwrap_or_else(|| (rates.expected_online_count() as usize).min(config.nodes));
        let nodes: Vec<bool> = (0..config.nodes).map(|i| i == 0 || i < initial_online).collect();
        let online = Arc::new(AtomicUsize::new(nodes.iter().filter(|on| **on).count()));

        info!(
            "churn process: N={} lambda_f={:.6}/s lambda_r={:.6}/s expected_online={:.2} initial_online={}",
            config.nodes,
            rates.lambda_f,
            rates.lambda_r,
            rates.expected_online_count(),
            online.load(Ordering::SeqCst)
        );

        let stop = StopSignal::new();
        let stats = StatsHandle::new();
        let engine = EpochEngine {
            nodes,
            probabilities,
            rng,
            hooks: Arc::clone(&hooks),
            stop: stop.clone(),
            stats: stats.clone(),
            online: Arc::clone(&online),
        };

        Ok(Self {
            config,
            rates,
            context,
            hooks,
            engine: Some(engine),
            task: None,
            stop,
            stats,
            online,
            state: ProcessState::Idle,
            bootstrapped: false,
        })
    }

    /// Creates a process whose RNG comes from the config seed, or from the
    /// context when the seed is 0.
    pub fn from_config(config: ChurnConfig, context: Arc<C>, hooks: Arc<dyn NodeLifecycle>) -> ChurnResult<Self> {
        let rng = match config.seed {
            0 => context.derive_rng(0),
            seed => ChurnRng::seed_from_u64(seed),
        };
        Self::new(config, context, hooks, rng)
    }

    /// Shares an existing stop signal, e.g. one the experiment harness
    /// also hands to its lifecycle hooks.
    ///
    /// Only allowed while `Idle`: a running loop keeps watching the signal
    /// it was spawned with, so swapping it then would leave
    /// [`stop`](Self::stop) joining a loop that never sees the trigger.
    pub fn set_stop_signal(&mut self, stop: StopSignal) -> ChurnResult<()> {
        if self.state != ProcessState::Idle {
            return Err(ChurnError::InvalidState(self.state.name()));
        }
        let engine = self.engine.as_mut().ok_or(ChurnError::InvalidState("running"))?;
        engine.stop = stop.clone();
        self.stop = stop;
        Ok(())
    }

    /// Bootstraps, then runs epochs.
    ///
    /// * `None` - spawns the free-running loop and returns; call [`stop`](Self::stop) to end it
    /// * `Some(n)` - runs `n` epochs on the caller's task, then returns
    ///
    /// With `live`, epochs are paced to the configured duration on the
    /// context clock.
    pub async fn run_simulation(&mut self, total_epochs: Option<u64>, live: bool) -> ChurnResult<()> {
        if self.state != ProcessState::Idle {
            return Err(ChurnError::InvalidState(self.state.name()));
        }
        self.bootstrap().await?;

        match total_epochs {
            None => {
                let engine = self.engine.take().ok_or(ChurnError::InvalidState("running"))?;
                let context = Arc::clone(&self.context);
                let epoch = self.epoch_duration();
                self.task = Some(tokio::spawn(engine.run_loop(context, epoch, live)));
                self.state = ProcessState::Running;
                info!("epoch loop started (epoch={:.2}s, live={})", epoch.as_secs_f64(), live);
                Ok(())
            }
            Some(epochs) => self.run_bounded(epochs, live).await,
        }
    }

    /// Runs up to `epochs` passes on the caller's task.
    ///
    /// Ends early once the stop signal is set, without appending the
    /// interrupted pass. A run started with the signal already set records
    /// nothing and leaves the process `Stopped`.
    async fn run_bounded(&mut self, epochs: u64, live: bool) -> ChurnResult<()> {
        let epoch = self.epoch_duration();
        let engine = self.engine.as_mut().ok_or(ChurnError::InvalidState("running"))?;

        for _ in 0..epochs {
            if engine.stop.is_triggered() {
                break;
            }
            let outcome = engine.run_epoch().await;
            engine.record(outcome);
            if live {
                let stop = engine.stop.clone();
                tokio::select! {
                    _ = self.context.sleep(epoch) => {}
                    _ = stop.triggered() => {}
                }
            }
        }

        if self.stop.is_triggered() {
            self.state = ProcessState::Stopped;
        }
        Ok(())
    }

    /// Starts every initially-online node, concurrently, once.
    ///
    /// Waits for all bring-up calls and fails with the first hook error.
    /// Bring-up is not a churn transition and is never counted.
    async fn bootstrap(&mut self) -> ChurnResult<()> {
        if self.bootstrapped {
            return Ok(());
        }
        let engine = self.engine.as_ref().ok_or(ChurnError::InvalidState("running"))?;
        let to_start: Vec<NodeIndex> = engine
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, online)| **online)
            .map(|(i, _)| NodeIndex(i))
            .collect();
        info!("starting {} nodes: {:?}", to_start.len(), to_start.iter().map(NodeIndex::get).collect::<Vec<_>>());

        let mut starts = JoinSet::new();
        for node in to_start {
            let hooks = Arc::clone(&self.hooks);
            starts.spawn(async move { (node, hooks.on_reconnect(node).await) });
        }

        let mut first_error = None;
        while let Some(joined) = starts.join_next().await {
            let error = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((node, Err(source))) => ChurnError::Bootstrap { node, source },
                Err(e) => ChurnError::Task(e.to_string()),
            };
            warn!("bootstrap: {}", error);
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(error) => Err(error),
            None => {
                self.bootstrapped = true;
                Ok(())
            }
        }
    }

    /// Runs one trial pass without recording it.
    ///
    /// Only available while no background loop owns the node states.
    pub async fn run_epoch(&mut self) -> ChurnResult<EpochOutcome> {
        let engine = self.engine.as_mut().ok_or(ChurnError::InvalidState("running"))?;
        Ok(engine.run_epoch().await)
    }

    /// Stops the background loop and waits for it to exit.
    ///
    /// No-op when no loop is active, so calling it twice is harmless.
    pub async fn stop(&mut self) -> ChurnResult<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        self.stop.trigger();
        self.state = ProcessState::Stopped;

        let engine = task.await.map_err(|e| ChurnError::Task(e.to_string()))?;
        self.engine = Some(engine);
        info!("churn process stopped after {} epochs", self.stats.epochs());
        Ok(())
    }

    /// Returns a handle that cancels this process from another task.
    pub fn stop_handle(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn config(&self) -> &ChurnConfig {
        &self.config
    }

    pub fn rates(&self) -> &ChurnRates {
        &self.rates
    }

    /// Shared statistics handle, readable while the loop runs.
    pub fn stats(&self) -> StatsHandle {
        self.stats.clone()
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    /// Nodes currently online, anchor included.
    pub fn online_count(&self) -> usize {
        self.online.load(Ordering::SeqCst)
    }

    /// Snapshot of per-slot online flags.
    pub fn node_states(&self) -> ChurnResult<Vec<bool>> {
        self.engine
            .as_ref()
            .map(|engine| engine.nodes.clone())
            .ok_or(ChurnError::InvalidState("running"))
    }

    pub fn epoch_duration(&self) -> Duration {
        Duration::from_secs_f64(self.config.epoch_duration_secs)
    }

    // -- analytic queries ------------------------------------------------

    pub fn expected_online_nodes(&self) -> f64 {
        self.rates.expected_online_count()
    }

    pub fn expected_time_above_threshold(&self, threshold: usize) -> f64 {
        self.rates.expected_time_above_threshold(threshold)
    }

    // -- empirical queries -----------------------------------------------

    pub fn online_nodes(&self) -> ChurnResult<f64> {
        self.stats.mean_online()
    }

    pub fn time_above_threshold(&self, threshold: usize) -> ChurnResult<f64> {
        self.stats.time_above_threshold(threshold)
    }

    pub fn avg_fail_per_epoch(&self) -> ChurnResult<f64> {
        self.stats.avg_failures_per_epoch()
    }

    pub fn avg_rec_per_epoch(&self) -> ChurnResult<f64> {
        self.stats.avg_reconnections_per_epoch()
    }

    pub fn fail_per_min(&self) -> ChurnResult<f64> {
        self.stats.failures_per_min(self.config.epoch_duration_secs)
    }

    pub fn rec_per_min(&self) -> ChurnResult<f64> {
        self.stats.reconnections_per_min(self.config.epoch_duration_secs)
    }

    pub fn failed_failures(&self) -> u64 {
        self.stats.failed_failures()
    }

    pub fn failed_reconnections(&self) -> u64 {
        self.stats.failed_reconnections()
    }

    /// Expected-versus-observed summary at `threshold`.
    pub fn report(&self, threshold: usize) -> ChurnResult<ChurnReport> {
        self.stats
            .read(|stats| ChurnReport::new(&self.rates, stats, self.config.epoch_duration_secs, threshold))
    }
}

impl<C: ChurnContext> Drop for ChurnProcess<C> {
    fn drop(&mut self) {
        // An orphaned loop must not keep calling hooks
        if self.task.is_some() {
            self.stop.trigger();
        }
    }
}
