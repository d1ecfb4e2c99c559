//! Rate Calibrator
//! ===============
//!
//! Derives per-node transition intensities from group-level targets.
//!
//! Every node except the anchor (slot 0) alternates between online and
//! offline. Online periods end at rate `λf`, offline periods end at rate
//! `λr`, so in steady state a node is online with probability
//!
//! ```text
//! p = λr / (λf + λr) = 1 / (λf · t_r + 1)        (t_r = 1/λr, mean reconnection time)
//! ```
//!
//! The observed system-wide failure rate `F` (fail/min) is produced by the
//! online non-anchor nodes:
//!
//! ```text
//! F/60 = λf · (E[online] − 1),     E[online] = 1 + (N−1)·p
//! ```
//!
//! Solving for `λf` gives the closed form used by [`ChurnRates::calibrate`]:
//!
//! ```text
//! λf = −(F/60)·λr / ((F/60) − (N−1)·λr)
//! ```
//!
//! As `F/60 → (N−1)·λr` the denominator vanishes: every node would have to
//! fail the instant it comes back. Past that point `λf` turns negative.
//! Both cases are configuration errors, never clamped.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::TrialPolicy;
use crate::error::{ChurnError, ChurnResult};

/// Per-epoch probability above which the Bernoulli approximation gets coarse.
pub const COARSE_TRIAL_PROBABILITY: f64 = 0.1;

/// Calibrated intensity pair for one group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChurnRates {
    /// Group size, anchor included
    pub nodes: usize,

    /// Per-node failure intensity (1/s)
    pub lambda_f: f64,

    /// Per-node reconnection intensity (1/s)
    pub lambda_r: f64,

    /// Mean reconnection time (s), `1/λr`
    pub avg_reconnection_secs: f64,
}

/// Bernoulli success probabilities for one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialProbabilities {
    /// Chance an online node fails this epoch
    pub failure: f64,

    /// Chance an offline node reconnects this epoch
    pub reconnection: f64,
}

impl ChurnRates {
    /// Solves for `(λf, λr)` from group-level targets.
    ///
    /// # Arguments
    /// * `nodes` - Group size N (≥ 2), anchor included
    /// * `system_failure_rate_per_min` - Target failures per minute across the group
    /// * `avg_reconnection_time_min` - Target mean offline duration in minutes
    pub fn calibrate(
        nodes: usize,
        system_failure_rate_per_min: f64,
        avg_reconnection_time_min: f64,
    ) -> ChurnResult<Self> {
        if nodes < 2 {
            return Err(ChurnError::invalid(format!("group needs at least 2 nodes, got {nodes}")));
        }
        if !system_failure_rate_per_min.is_finite() || system_failure_rate_per_min < 0.0 {
            return Err(ChurnError::invalid(format!(
                "system failure rate must be finite and non-negative, got {system_failure_rate_per_min}"
            )));
        }
        if !avg_reconnection_time_min.is_finite() || avg_reconnection_time_min <= 0.0 {
            return Err(ChurnError::invalid(format!(
                "mean reconnection time must be positive, got {avg_reconnection_time_min}"
            )));
        }

        let avg_reconnection_secs = avg_reconnection_time_min * 60.0;
        let lambda_r = 1.0 / avg_reconnection_secs;

        let f = system_failure_rate_per_min / 60.0;
        let lambda_f = (-f * lambda_r) / (f - (nodes - 1) as f64 * lambda_r);

        if !lambda_f.is_finite() || lambda_f < 0.0 {
            return Err(ChurnError::InfeasibleTarget {
                nodes,
                failure_rate_per_min: system_failure_rate_per_min,
                lambda_r,
                lambda_f,
            });
        }

        Ok(Self {
            nodes,
            // -0.0 when F = 0
            lambda_f: lambda_f.abs(),
            lambda_r,
            avg_reconnection_secs,
        })
    }

    /// Builds a rate pair directly from intensities.
    pub fn from_intensities(nodes: usize, lambda_f: f64, lambda_r: f64) -> ChurnResult<Self> {
        if nodes < 2 {
            return Err(ChurnError::invalid(format!("group needs at least 2 nodes, got {nodes}")));
        }
        if !lambda_f.is_finite() || lambda_f < 0.0 {
            return Err(ChurnError::invalid(format!("lambda_f must be finite and non-negative, got {lambda_f}")));
        }
        if !lambda_r.is_finite() || lambda_r <= 0.0 {
            return Err(ChurnError::invalid(format!("lambda_r must be positive, got {lambda_r}")));
        }
        Ok(Self {
            nodes,
            lambda_f,
            lambda_r,
            avg_reconnection_secs: 1.0 / lambda_r,
        })
    }

    /// Steady-state probability that a non-anchor node is online.
    pub fn online_probability(&self) -> f64 {
        1.0 / (self.lambda_f * self.avg_reconnection_secs + 1.0)
    }

    /// Expected steady-state number of online nodes, anchor included.
    pub fn expected_online_count(&self) -> f64 {
        1.0 + (self.nodes - 1) as f64 / (self.lambda_f * self.avg_reconnection_secs + 1.0)
    }

    /// Expected fraction of time with at least `threshold` nodes online.
    ///
    /// Binomial tail over the `N−1` non-anchor nodes; the anchor supplies
    /// the remaining one.
    pub fn expected_time_above_threshold(&self, threshold: usize) -> f64 {
        if threshold <= 1 {
            return 1.0;
        }
        if threshold > self.nodes {
            return 0.0;
        }

        let n = self.nodes - 1;
        let p = self.online_probability();
        let q = 1.0 - p;
        (threshold - 1..=n)
            .map(|k| binomial(n, k) * p.powi(k as i32) * q.powi((n - k) as i32))
            .sum::<f64>()
            .min(1.0)
    }

    /// Forward relation: the system-wide failure rate (fail/min) these
    /// intensities produce in steady state.
    pub fn expected_failure_rate_per_min(&self) -> f64 {
        self.lambda_f * (self.expected_online_count() - 1.0) * 60.0
    }

    /// System-wide reconnection rate (rec/min) in steady state.
    ///
    /// Balances [`expected_failure_rate_per_min`](Self::expected_failure_rate_per_min).
    pub fn expected_reconnection_rate_per_min(&self) -> f64 {
        self.lambda_r * (self.nodes as f64 - self.expected_online_count()) * 60.0
    }

    /// Per-epoch Bernoulli probabilities for an epoch of `epoch_secs`.
    pub fn trial_probabilities(&self, epoch_secs: f64, policy: TrialPolicy) -> ChurnResult<TrialProbabilities> {
        let failure = check_probability("failure", self.lambda_f * epoch_secs, policy)?;
        let reconnection = check_probability("reconnection", self.lambda_r * epoch_secs, policy)?;
        Ok(TrialProbabilities { failure, reconnection })
    }
}

fn check_probability(kind: &'static str, probability: f64, policy: TrialPolicy) -> ChurnResult<f64> {
    if probability > 1.0 {
        match policy {
            TrialPolicy::Reject => {
                return Err(ChurnError::TrialProbabilityOutOfRange { kind, probability });
            }
            TrialPolicy::Clamp => {
                warn!("{} probability {:.4} per epoch clamped to 1", kind, probability);
                return Ok(1.0);
            }
        }
    }
    if probability > COARSE_TRIAL_PROBABILITY {
        warn!(
            "{} probability {:.4} per epoch; Bernoulli approximation is coarse",
            kind, probability
        );
    }
    Ok(probability)
}

/// Binomial coefficient C(n, k).
///
/// Exact in integer arithmetic while the value fits in a `u128`, which
/// covers every group size this driver targets.
pub fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);

    let mut exact: u128 = 1;
    for i in 1..=k {
        // exact * (n-k+i) is always divisible by i
        match exact.checked_mul((n - k + i) as u128) {
            Some(v) => exact = v / i as u128,
            None => {
                let mut approx = exact as f64;
                for j in i..=k {
                    approx = approx * (n - k + j) as f64 / j as f64;
                }
                return approx;
            }
        }
    }
    exact as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_binomial_exact() {
        assert_eq!(binomial(5, 0), 1.0);
        assert_eq!(binomial(5, 2), 10.0);
        assert_eq!(binomial(6, 3), 20.0);
        assert_eq!(binomial(29, 14), 77_558_760.0);
        assert_eq!(binomial(60, 30), 118_264_581_564_861_424.0);
        assert_eq!(binomial(3, 4), 0.0);
    }

    #[test]
    fn test_zero_failure_rate_means_everyone_online() {
        let rates = ChurnRates::calibrate(30, 0.0, 99999.0).unwrap();

        assert_eq!(rates.lambda_f, 0.0);
        assert!(rates.lambda_f.is_sign_positive());
        assert_eq!(rates.expected_online_count(), 30.0);
        assert_eq!(rates.expected_time_above_threshold(30), 1.0);
    }

    #[test]
    fn test_seven_node_reference_configuration() {
        let rates = ChurnRates::calibrate(7, 5.0, 0.333333).unwrap();

        let online = rates.expected_online_count();
        let above = rates.expected_time_above_threshold(3);

        assert!(online.is_finite() && (0.0..=7.0).contains(&online));
        assert!(above.is_finite() && (0.0..=1.0).contains(&above));
        assert_relative_eq!(rates.lambda_r, 1.0 / 19.99998, epsilon = 1e-12);
        assert_relative_eq!(online, 5.3333, epsilon = 1e-3);
    }

    #[test]
    fn test_calibrated_rates_reproduce_target() {
        let rates = ChurnRates::calibrate(7, 5.0, 0.333333).unwrap();
        assert_relative_eq!(rates.expected_failure_rate_per_min(), 5.0, epsilon = 1e-9);
        assert_relative_eq!(
            rates.expected_reconnection_rate_per_min(),
            rates.expected_failure_rate_per_min(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_denominator_zero_is_infeasible() {
        // F/60 and λr are both 1/60: the denominator is exactly zero
        let err = ChurnRates::calibrate(2, 1.0, 1.0).unwrap_err();
        assert!(matches!(err, ChurnError::InfeasibleTarget { .. }));
    }

    #[test]
    fn test_target_above_capacity_is_infeasible() {
        let err = ChurnRates::calibrate(7, 10.0, 1.0).unwrap_err();
        match err {
            ChurnError::InfeasibleTarget { lambda_f, .. } => assert!(lambda_f < 0.0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(ChurnRates::calibrate(1, 1.0, 1.0), Err(ChurnError::InvalidConfig(_))));
        assert!(matches!(ChurnRates::calibrate(5, -1.0, 1.0), Err(ChurnError::InvalidConfig(_))));
        assert!(matches!(ChurnRates::calibrate(5, 1.0, 0.0), Err(ChurnError::InvalidConfig(_))));
        assert!(matches!(ChurnRates::from_intensities(5, f64::NAN, 1.0), Err(ChurnError::InvalidConfig(_))));
    }

    #[test]
    fn test_threshold_edges() {
        let rates = ChurnRates::calibrate(10, 20.0, 0.5).unwrap();
        assert_eq!(rates.expected_time_above_threshold(0), 1.0);
        assert_eq!(rates.expected_time_above_threshold(1), 1.0);
        assert_eq!(rates.expected_time_above_threshold(11), 0.0);

        let all = rates.expected_time_above_threshold(10);
        assert_relative_eq!(all, rates.online_probability().powi(9), epsilon = 1e-12);
    }

    #[test]
    fn test_trial_probability_policies() {
        let rates = ChurnRates::from_intensities(5, 0.5, 0.2).unwrap();

        let p = rates.trial_probabilities(1.0, TrialPolicy::Reject).unwrap();
        assert_relative_eq!(p.failure, 0.5);
        assert_relative_eq!(p.reconnection, 0.2);

        let err = rates.trial_probabilities(4.0, TrialPolicy::Reject).unwrap_err();
        assert!(matches!(err, ChurnError::TrialProbabilityOutOfRange { kind: "failure", .. }));

        let p = rates.trial_probabilities(4.0, TrialPolicy::Clamp).unwrap();
        assert_eq!(p.failure, 1.0);
        assert_relative_eq!(p.reconnection, 0.8);
    }

    proptest! {
        #[test]
        fn prop_expected_online_in_range_and_monotone(
            nodes in 2usize..64,
            lambda_r in 1e-4f64..1.0,
            lambda_f in 0.0f64..1.0,
            bump in 0.0f64..1.0,
        ) {
            let lo = ChurnRates::from_intensities(nodes, lambda_f, lambda_r).unwrap();
            let hi = ChurnRates::from_intensities(nodes, lambda_f + bump, lambda_r).unwrap();

            let e_lo = lo.expected_online_count();
            let e_hi = hi.expected_online_count();
            prop_assert!(e_lo >= 1.0 && e_lo <= nodes as f64);
            prop_assert!(e_hi <= e_lo);
        }

        #[test]
        fn prop_threshold_bounds(
            nodes in 2usize..48,
            lambda_r in 1e-4f64..1.0,
            lambda_f in 0.0f64..1.0,
        ) {
            let rates = ChurnRates::from_intensities(nodes, lambda_f, lambda_r).unwrap();
            prop_assert_eq!(rates.expected_time_above_threshold(1), 1.0);
            prop_assert_eq!(rates.expected_time_above_threshold(nodes + 1), 0.0);
            for t in 2..=nodes {
                let frac = rates.expected_time_above_threshold(t);
                prop_assert!((0.0..=1.0).contains(&frac));
            }
        }

        #[test]
        fn prop_calibration_round_trip(
            nodes in 2usize..64,
            avg_min in 0.05f64..30.0,
            lambda_f in 0.0f64..0.5,
        ) {
            let lambda_r = 1.0 / (avg_min * 60.0);
            let forward = ChurnRates::from_intensities(nodes, lambda_f, lambda_r).unwrap();
            let target = forward.expected_failure_rate_per_min();

            let inverse = ChurnRates::calibrate(nodes, target, avg_min).unwrap();
            prop_assert!((inverse.lambda_f - lambda_f).abs() <= 1e-9 * lambda_f.max(1.0));
        }
    }
}
