//! Greeks vs open-interest cross validation
//!
//! Delta moving without open interest behind it is a fake move; delta and
//! OI rising together is smart-money conviction; a sharp theta drop is a
//! decay trap.

use crate::config::OiSyncConfig;
use crate::types::{ContractKey, GreeksMap, GreeksSnapshot, OiMap, OptionSide};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Direction of a series between two cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Rose by more than the threshold
    Up,
    /// Fell by more than the threshold
    Down,
    /// Within the threshold
    Flat,
}

impl Direction {
    /// Classify by relative change; absolute change when `previous` is zero
    #[must_use]
    pub fn classify(current: f64, previous: f64, threshold: f64) -> Self {
        let change = current - previous;
        let relative = if previous == 0.0 { change } else { change / previous.abs() };
        if relative > threshold {
            Self::Up
        } else if relative < -threshold {
            Self::Down
        } else {
            Self::Flat
        }
    }
}

/// Validator recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OiRecommendation {
    /// Move confirmed
    Proceed,
    /// Move questionable
    Caution,
    /// Move contradicted
    Avoid,
    /// Nothing conclusive
    Neutral,
}

/// Inputs for one contract
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OiSyncInput {
    /// Strike price
    pub strike: f64,
    /// Call or put
    pub side: OptionSide,
    /// Delta this cycle
    pub delta: f64,
    /// Delta last cycle
    pub prev_delta: f64,
    /// Open interest this cycle
    pub oi: u64,
    /// Open interest last cycle
    pub prev_oi: u64,
    /// Gamma change since last cycle
    pub gamma_change: f64,
    /// Theta change since last cycle
    pub theta_change: f64,
}

impl OiSyncInput {
    /// Build from a snapshot with history plus both OI observations
    #[must_use]
    pub fn from_snapshot(snapshot: &GreeksSnapshot, oi: u64, prev_oi: u64) -> Option<Self> {
        Some(Self {
            strike: snapshot.strike,
            side: snapshot.side,
            delta: snapshot.delta,
            prev_delta: snapshot.prev_delta?,
            oi,
            prev_oi,
            gamma_change: snapshot.gamma - snapshot.prev_gamma?,
            theta_change: snapshot.theta - snapshot.prev_theta?,
        })
    }
}

/// Validation outcome for one contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OiSyncResult {
    /// Strike price
    pub strike: f64,
    /// Call or put
    pub side: OptionSide,
    /// Delta direction
    pub delta_direction: Direction,
    /// Open interest direction
    pub oi_direction: Direction,
    /// Delta up while OI falls
    pub fake_move_detected: bool,
    /// Delta and OI rising together
    pub smart_money_signal: bool,
    /// Theta dropped past the spike threshold
    pub theta_exit_signal: bool,
    /// Gamma expanded with OI rising
    pub gamma_expansion: bool,
    /// Confidence in the move, in [0, 1]
    pub quality_score: f64,
    /// Recommendation
    pub recommendation: OiRecommendation,
    /// Human-readable rationale
    pub reason: String,
}

/// Chain-level reduction of per-contract results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOiSync {
    /// Contracts validated
    pub validated: usize,
    /// Fake moves
    pub fake_moves: usize,
    /// Smart-money confirmations
    pub smart_money: usize,
    /// Theta exits
    pub theta_danger: usize,
    /// Mean quality score
    pub average_quality: f64,
    /// Chain recommendation
    pub recommendation: OiRecommendation,
    /// Per-contract results, ordered by contract
    pub results: Vec<OiSyncResult>,
}

impl ChainOiSync {
    /// Result for one contract, if it was validated
    #[must_use]
    pub fn result_for(&self, key: ContractKey) -> Option<&OiSyncResult> {
        self.results
            .iter()
            .find(|r| ContractKey::new(r.strike, r.side) == key)
    }
}

/// Validator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OiSyncStats {
    /// Contracts validated
    pub total_validations: u64,
    /// Fake moves seen
    pub fake_moves: u64,
    /// Smart-money confirmations seen
    pub smart_money: u64,
    /// Theta exits seen
    pub theta_exits: u64,
}

/// OI-sync validator
#[derive(Debug)]
pub struct OiSyncValidator {
    config: OiSyncConfig,
    total_validations: AtomicU64,
    fake_moves: AtomicU64,
    smart_money: AtomicU64,
    theta_exits: AtomicU64,
}

impl OiSyncValidator {
    /// Create a validator
    #[must_use]
    pub fn new(config: OiSyncConfig) -> Self {
        Self {
            config,
            total_validations: AtomicU64::new(0),
            fake_moves: AtomicU64::new(0),
            smart_money: AtomicU64::new(0),
            theta_exits: AtomicU64::new(0),
        }
    }

    /// Validate one contract. Pure: counters are only touched by [`Self::validate_chain`].
    #[must_use]
    pub fn validate(&self, input: &OiSyncInput) -> OiSyncResult {
        let cfg = &self.config;
        let delta_direction =
            Direction::classify(input.delta, input.prev_delta, cfg.direction_threshold);
        let oi_direction = Direction::classify(
            input.oi as f64,
            input.prev_oi as f64,
            cfg.direction_threshold,
        );

        let mut result = OiSyncResult {
            strike: input.strike,
            side: input.side,
            delta_direction,
            oi_direction,
            fake_move_detected: false,
            smart_money_signal: false,
            theta_exit_signal: false,
            gamma_expansion: false,
            quality_score: 0.5,
            recommendation: OiRecommendation::Neutral,
            reason: String::new(),
        };

        let (quality, recommendation, reason) = match (delta_direction, oi_direction) {
            (Direction::Up, Direction::Up) => {
                result.smart_money_signal = true;
                (0.9, OiRecommendation::Proceed, "delta and OI rising together")
            }
            (Direction::Up, Direction::Down) => {
                result.fake_move_detected = true;
                (0.1, OiRecommendation::Avoid, "delta rising while OI unwinds")
            }
            (Direction::Down, Direction::Up) => {
                (0.4, OiRecommendation::Caution, "delta falling into fresh OI; reversal setup")
            }
            (Direction::Flat, Direction::Up) => {
                (0.6, OiRecommendation::Neutral, "OI building without delta move")
            }
            (Direction::Flat, Direction::Flat) => (0.5, OiRecommendation::Neutral, "no change"),
            (Direction::Up, Direction::Flat) => {
                (0.5, OiRecommendation::Neutral, "delta move without OI participation")
            }
            (Direction::Flat, Direction::Down) | (Direction::Down, Direction::Flat) => {
                (0.4, OiRecommendation::Neutral, "one-sided weakening")
            }
            (Direction::Down, Direction::Down) => {
                (0.3, OiRecommendation::Neutral, "delta and OI unwinding together")
            }
        };
        result.quality_score = quality;
        result.recommendation = recommendation;
        result.reason = reason.to_string();

        if input.gamma_change > cfg.gamma_expansion_threshold && oi_direction == Direction::Up {
            result.gamma_expansion = true;
            if result.recommendation != OiRecommendation::Avoid {
                result.recommendation = OiRecommendation::Proceed;
                result.quality_score = result.quality_score.max(0.8);
                result.reason.push_str("; gamma expanding with OI");
            }
        }

        if input.theta_change < cfg.theta_spike_threshold {
            result.theta_exit_signal = true;
            if result.recommendation == OiRecommendation::Proceed {
                result.recommendation = OiRecommendation::Caution;
            }
            result.reason.push_str("; theta decay accelerating");
        }

        result.quality_score = result.quality_score.clamp(0.0, 1.0);
        result
    }

    /// Validate every contract with history on both Greeks and OI, then reduce
    pub fn validate_chain(
        &self,
        greeks: &GreeksMap,
        current_oi: &OiMap,
        previous_oi: &OiMap,
    ) -> ChainOiSync {
        let results: Vec<OiSyncResult> = greeks
            .iter()
            .filter_map(|(key, snapshot)| {
                let oi = current_oi.get(key)?;
                let prev = previous_oi.get(key)?;
                OiSyncInput::from_snapshot(snapshot, oi.oi, prev.oi)
            })
            .map(|input| self.validate(&input))
            .collect();

        let chain = self.aggregate(results);

        self.total_validations.fetch_add(chain.validated as u64, Ordering::Relaxed);
        self.fake_moves.fetch_add(chain.fake_moves as u64, Ordering::Relaxed);
        self.smart_money.fetch_add(chain.smart_money as u64, Ordering::Relaxed);
        self.theta_exits.fetch_add(chain.theta_danger as u64, Ordering::Relaxed);

        if chain.recommendation == OiRecommendation::Avoid {
            warn!(
                validated = chain.validated,
                fake_moves = chain.fake_moves,
                "Fake move detected across chain"
            );
        } else {
            debug!(
                validated = chain.validated,
                smart_money = chain.smart_money,
                theta_danger = chain.theta_danger,
                recommendation = ?chain.recommendation,
                "OI sync complete"
            );
        }

        chain
    }

    /// Reduce per-contract results into one chain recommendation
    ///
    /// Depends only on the multiset of results, so input order never changes
    /// the recommendation.
    #[must_use]
    pub fn aggregate(&self, results: Vec<OiSyncResult>) -> ChainOiSync {
        let cfg = &self.config;
        let validated = results.len();
        let fake_moves = results.iter().filter(|r| r.fake_move_detected).count();
        let smart_money = results.iter().filter(|r| r.smart_money_signal).count();
        let theta_danger = results.iter().filter(|r| r.theta_exit_signal).count();

        if validated == 0 {
            return ChainOiSync {
                validated,
                fake_moves,
                smart_money,
                theta_danger,
                average_quality: 0.0,
                recommendation: OiRecommendation::Neutral,
                results,
            };
        }

        let n = validated as f64;
        let recommendation = if fake_moves as f64 / n > cfg.fake_ratio_limit {
            OiRecommendation::Avoid
        } else if smart_money as f64 / n > cfg.smart_money_ratio {
            OiRecommendation::Proceed
        } else if theta_danger as f64 / n > cfg.theta_danger_ratio {
            OiRecommendation::Caution
        } else {
            OiRecommendation::Neutral
        };

        // Sorted so the float sum is identical for any input order
        let mut qualities: Vec<f64> = results.iter().map(|r| r.quality_score).collect();
        qualities.sort_by(f64::total_cmp);
        let average_quality = qualities.iter().sum::<f64>() / n;

        ChainOiSync {
            validated,
            fake_moves,
            smart_money,
            theta_danger,
            average_quality,
            recommendation,
            results,
        }
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> OiSyncStats {
        OiSyncStats {
            total_validations: self.total_validations.load(Ordering::Relaxed),
            fake_moves: self.fake_moves.load(Ordering::Relaxed),
            smart_money: self.smart_money.load(Ordering::Relaxed),
            theta_exits: self.theta_exits.load(Ordering::Relaxed),
        }
    }
}
