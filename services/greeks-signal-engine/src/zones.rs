//! Change and zone analysis
//!
//! Cycle-over-cycle Greek velocities, the gamma-peak / theta-kill /
//! delta-neutral zones around the ATM strike, and a momentum summary.

use crate::config::ZoneConfig;
use crate::types::{GreeksMap, GreeksSnapshot, OptionSide};
use serde::{Deserialize, Serialize};

/// Change in each Greek between two cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GreekVelocity {
    /// Delta change
    pub delta: f64,
    /// Gamma change
    pub gamma: f64,
    /// Theta change
    pub theta: f64,
    /// Vega change
    pub vega: f64,
    /// Any change above the movement epsilon
    pub has_movement: bool,
}

impl GreekVelocity {
    /// Velocity from two snapshots of the same contract
    #[must_use]
    pub fn between(current: &GreeksSnapshot, previous: &GreeksSnapshot, epsilon: f64) -> Self {
        Self::from_changes(
            current.delta - previous.delta,
            current.gamma - previous.gamma,
            current.theta - previous.theta,
            current.vega - previous.vega,
            epsilon,
        )
    }

    /// Velocity from a snapshot's own `prev_*` fields; `None` on the first cycle
    #[must_use]
    pub fn from_snapshot(snapshot: &GreeksSnapshot, epsilon: f64) -> Option<Self> {
        Some(Self::from_changes(
            snapshot.delta - snapshot.prev_delta?,
            snapshot.gamma - snapshot.prev_gamma?,
            snapshot.theta - snapshot.prev_theta?,
            snapshot.vega - snapshot.prev_vega?,
            epsilon,
        ))
    }

    fn from_changes(delta: f64, gamma: f64, theta: f64, vega: f64, epsilon: f64) -> Self {
        let has_movement = [delta, gamma, theta, vega].iter().any(|d| d.abs() > epsilon);
        Self {
            delta,
            gamma,
            theta,
            vega,
            has_movement,
        }
    }
}

/// Which side's delta dominates at the money
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaBattle {
    /// Call delta exceeds absolute put delta
    CeLeading,
    /// Absolute put delta exceeds call delta
    PeLeading,
    /// Within tolerance
    Neutral,
}

/// Chain-wide delta momentum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MomentumTendency {
    /// Deltas rising (underlying accelerating up)
    Bullish,
    /// Deltas falling
    Bearish,
    /// No dominant direction
    Flat,
}

/// Aggregate delta velocity across tracked contracts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentumSummary {
    /// Contracts whose delta rose
    pub bullish_contracts: usize,
    /// Contracts whose delta fell
    pub bearish_contracts: usize,
    /// Mean delta velocity over contracts with history
    pub mean_delta_velocity: f64,
    /// Dominant tendency
    pub tendency: MomentumTendency,
}

impl Default for MomentumSummary {
    fn default() -> Self {
        Self {
            bullish_contracts: 0,
            bearish_contracts: 0,
            mean_delta_velocity: 0.0,
            tendency: MomentumTendency::Flat,
        }
    }
}

/// Zone intelligence around the ATM strike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmIntelligence {
    /// At-the-money strike
    pub atm_strike: f64,
    /// Strike carrying the highest gamma
    pub gamma_peak_strike: f64,
    /// Highest gamma
    pub gamma_peak_value: f64,
    /// Strike carrying the largest time decay
    pub theta_kill_strike: f64,
    /// Largest absolute daily theta
    pub theta_kill_value: f64,
    /// Call strike with delta nearest 0.5 and put strike with delta nearest -0.5
    pub delta_neutral_zone: (f64, f64),
    /// ATM call delta
    pub atm_call_delta: f64,
    /// ATM put delta
    pub atm_put_delta: f64,
    /// Leading side at the money
    pub delta_battle: DeltaBattle,
    /// Gamma peak below danger threshold
    pub gamma_safe: bool,
    /// Theta kill below danger threshold
    pub theta_safe: bool,
    /// Chain momentum
    pub momentum: MomentumSummary,
}

impl AtmIntelligence {
    /// Zone view with no data: ATM deltas at their neutral values
    #[must_use]
    pub fn empty(atm_strike: f64) -> Self {
        Self {
            atm_strike,
            gamma_peak_strike: atm_strike,
            gamma_peak_value: 0.0,
            theta_kill_strike: atm_strike,
            theta_kill_value: 0.0,
            delta_neutral_zone: (atm_strike, atm_strike),
            atm_call_delta: OptionSide::Call.fallback_delta(),
            atm_put_delta: OptionSide::Put.fallback_delta(),
            delta_battle: DeltaBattle::Neutral,
            gamma_safe: true,
            theta_safe: true,
            momentum: MomentumSummary::default(),
        }
    }
}

/// Change and zone analyzer
#[derive(Debug, Clone)]
pub struct ChangeAnalyzer {
    config: ZoneConfig,
}

impl ChangeAnalyzer {
    /// Create an analyzer
    #[must_use]
    pub const fn new(config: ZoneConfig) -> Self {
        Self { config }
    }

    /// Velocities between two snapshots of one contract
    #[must_use]
    pub fn compute_deltas(
        &self,
        current: &GreeksSnapshot,
        previous: &GreeksSnapshot,
    ) -> GreekVelocity {
        GreekVelocity::between(current, previous, self.config.movement_epsilon)
    }

    /// Locate gamma-peak, theta-kill and delta-neutral zones around the ATM strike
    #[must_use]
    pub fn analyze_atm_zone(&self, atm_strike: f64, greeks: &GreeksMap) -> AtmIntelligence {
        let mut intel = AtmIntelligence::empty(atm_strike);
        if greeks.is_empty() {
            return intel;
        }

        // Ties go to the strike nearest ATM, then the lower strike (map order)
        let closer = |candidate: f64, incumbent: f64| {
            (candidate - atm_strike).abs() < (incumbent - atm_strike).abs()
        };

        let mut gamma_peak: Option<&GreeksSnapshot> = None;
        let mut theta_kill: Option<&GreeksSnapshot> = None;
        let mut neutral_call: Option<&GreeksSnapshot> = None;
        let mut neutral_put: Option<&GreeksSnapshot> = None;
        let mut atm_call: Option<&GreeksSnapshot> = None;
        let mut atm_put: Option<&GreeksSnapshot> = None;

        for snap in greeks.values() {
            gamma_peak = match gamma_peak {
                Some(best) if snap.gamma < best.gamma => Some(best),
                Some(best) if snap.gamma == best.gamma && !closer(snap.strike, best.strike) => {
                    Some(best)
                }
                _ => Some(snap),
            };
            theta_kill = match theta_kill {
                Some(best) if snap.theta.abs() < best.theta.abs() => Some(best),
                Some(best)
                    if snap.theta.abs() == best.theta.abs() && !closer(snap.strike, best.strike) =>
                {
                    Some(best)
                }
                _ => Some(snap),
            };

            let (neutral, atm) = match snap.side {
                OptionSide::Call => (&mut neutral_call, &mut atm_call),
                OptionSide::Put => (&mut neutral_put, &mut atm_put),
            };
            let target = snap.side.fallback_delta();
            *neutral = match *neutral {
                Some(best) if (best.delta - target).abs() <= (snap.delta - target).abs() => {
                    Some(best)
                }
                _ => Some(snap),
            };
            *atm = match *atm {
                Some(best) if !closer(snap.strike, best.strike) => Some(best),
                _ => Some(snap),
            };
        }

        if let Some(peak) = gamma_peak {
            intel.gamma_peak_strike = peak.strike;
            intel.gamma_peak_value = peak.gamma;
        }
        if let Some(kill) = theta_kill {
            intel.theta_kill_strike = kill.strike;
            intel.theta_kill_value = kill.theta.abs();
        }
        intel.delta_neutral_zone = (
            neutral_call.map_or(atm_strike, |s| s.strike),
            neutral_put.map_or(atm_strike, |s| s.strike),
        );
        if let Some(call) = atm_call {
            intel.atm_call_delta = call.delta;
        }
        if let Some(put) = atm_put {
            intel.atm_put_delta = put.delta;
        }

        let gap = intel.atm_call_delta - intel.atm_put_delta.abs();
        intel.delta_battle = if gap > self.config.delta_battle_tolerance {
            DeltaBattle::CeLeading
        } else if gap < -self.config.delta_battle_tolerance {
            DeltaBattle::PeLeading
        } else {
            DeltaBattle::Neutral
        };

        intel.gamma_safe = intel.gamma_peak_value <= self.config.gamma_danger_threshold;
        intel.theta_safe = intel.theta_kill_value <= self.config.theta_danger_threshold;
        intel.momentum = self.momentum(greeks);
        intel
    }

    /// Summarize delta velocity across all contracts with history
    ///
    /// A rising put delta (toward zero) is bullish just like a rising call delta.
    #[must_use]
    pub fn momentum(&self, greeks: &GreeksMap) -> MomentumSummary {
        let eps = self.config.movement_epsilon;
        let velocities: Vec<f64> = greeks
            .values()
            .filter_map(|s| GreekVelocity::from_snapshot(s, eps))
            .map(|v| v.delta)
            .collect();

        if velocities.is_empty() {
            return MomentumSummary::default();
        }

        let bullish = velocities.iter().filter(|&&v| v > eps).count();
        let bearish = velocities.iter().filter(|&&v| v < -eps).count();
        let mean = velocities.iter().sum::<f64>() / velocities.len() as f64;

        let tendency = if mean > eps && bullish > bearish {
            MomentumTendency::Bullish
        } else if mean < -eps && bearish > bullish {
            MomentumTendency::Bearish
        } else {
            MomentumTendency::Flat
        };

        MomentumSummary {
            bullish_contracts: bullish,
            bearish_contracts: bearish,
            mean_delta_velocity: mean,
            tendency,
        }
    }
}
