//! Churn scenarios for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// CHURN-001: 7 nodes at 5 failures/min converge on the analytic mean
    SteadyState,

    /// CHURN-002: zero failure rate, offline nodes only ever come back
    Frozen,

    /// CHURN-003: every kill is refused, the group never shrinks
    FailingKillHook,

    /// CHURN-004: one participant cannot be restarted once it is down
    FailingStartHook,

    /// CHURN-005: free-running loop on the virtual clock, stopped cleanly
    GracefulStop,

    /// CHURN-006: time above every threshold against the binomial tail
    ThresholdSweep,

    /// CHURN-007: slow hooks overrun the epoch, loop keeps going
    SlowHooks,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyState,
            ScenarioId::Frozen,
            ScenarioId::FailingKillHook,
            ScenarioId::FailingStartHook,
            ScenarioId::GracefulStop,
            ScenarioId::ThresholdSweep,
            ScenarioId::SlowHooks,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyState => "steady_state",
            ScenarioId::Frozen => "frozen",
            ScenarioId::FailingKillHook => "failing_kill_hook",
            ScenarioId::FailingStartHook => "failing_start_hook",
            ScenarioId::GracefulStop => "graceful_stop",
            ScenarioId::ThresholdSweep => "threshold_sweep",
            ScenarioId::SlowHooks => "slow_hooks",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyState => "N=7, 5 failures/min, 20s reconnection: observed mean matches expectation",
            ScenarioId::Frozen => "N=30, no failures: group fills up to 30 and stays there",
            ScenarioId::FailingKillHook => "Kill hook always errors: every node stays online, errors are counted",
            ScenarioId::FailingStartHook => "Node 3 cannot restart: it stays offline after its first failure",
            ScenarioId::GracefulStop => "Background loop on virtual time, stop() joins and freezes the stats",
            ScenarioId::ThresholdSweep => "Observed time above T tracks the binomial tail for every T",
            ScenarioId::SlowHooks => "Hook latency exceeds the epoch: overruns are tolerated",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady_state" | "steadystate" | "churn-001" => Ok(ScenarioId::SteadyState),
            "frozen" | "churn-002" => Ok(ScenarioId::Frozen),
            "failing_kill_hook" | "failingkillhook" | "churn-003" => Ok(ScenarioId::FailingKillHook),
            "failing_start_hook" | "failingstarthook" | "churn-004" => Ok(ScenarioId::FailingStartHook),
            "graceful_stop" | "gracefulstop" | "churn-005" => Ok(ScenarioId::GracefulStop),
            "threshold_sweep" | "thresholdsweep" | "churn-006" => Ok(ScenarioId::ThresholdSweep),
            "slow_hooks" | "slowhooks" | "churn-007" => Ok(ScenarioId::SlowHooks),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
