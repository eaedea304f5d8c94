//! Shared data model: contract identity, chain quotes and per-contract Greeks

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed-point scale for strike keys (two decimals, i.e. paise)
pub const STRIKE_SCALE: f64 = 100.0;

/// Option side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionSide {
    /// Call option (CE)
    #[serde(alias = "CE", alias = "CALL")]
    Call,
    /// Put option (PE)
    #[serde(alias = "PE", alias = "PUT")]
    Put,
}

impl OptionSide {
    /// Conservative delta used when Greeks cannot be computed
    #[must_use]
    pub const fn fallback_delta(self) -> f64 {
        match self {
            Self::Call => 0.5,
            Self::Put => -0.5,
        }
    }

    /// Valid delta range for this side
    #[must_use]
    pub const fn delta_range(self) -> (f64, f64) {
        match self {
            Self::Call => (0.0, 1.0),
            Self::Put => (-1.0, 0.0),
        }
    }
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
        }
    }
}

/// Convert a strike to its fixed-point key
#[must_use]
pub fn strike_to_ticks(strike: f64) -> i64 {
    // Strikes are validated positive and finite before keying
    (strike * STRIKE_SCALE).round() as i64
}

/// Hashable, ordered identity of one contract in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractKey {
    /// Strike in fixed point (strike x 100)
    pub strike_ticks: i64,
    /// Call or put
    pub side: OptionSide,
}

impl ContractKey {
    /// Build a key from a floating point strike
    #[must_use]
    pub fn new(strike: f64, side: OptionSide) -> Self {
        Self {
            strike_ticks: strike_to_ticks(strike),
            side,
        }
    }

    /// Strike as a float
    #[must_use]
    pub fn strike(&self) -> f64 {
        self.strike_ticks as f64 / STRIKE_SCALE
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.strike(), self.side)
    }
}

/// Where the implied volatility of a snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IvSource {
    /// Broker-supplied value that passed sanity checks
    Broker,
    /// Solved from the last traded price
    Calculated,
    /// Solver hit its iteration cap with a loose residual
    Estimated,
    /// Calculation failed, conservative defaults in use
    ErrorFallback,
}

/// Broker-published Greeks for one contract
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BrokerGreeks {
    /// Delta
    pub delta: f64,
    /// Gamma
    pub gamma: f64,
    /// Theta (per day)
    pub theta: f64,
    /// Vega (per vol point)
    pub vega: f64,
}

/// One row of the incoming option chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Strike price
    pub strike: f64,
    /// Call or put
    pub side: OptionSide,
    /// Last traded price
    pub ltp: f64,
    /// Best bid
    pub bid: f64,
    /// Best ask
    pub ask: f64,
    /// Open interest in contracts
    pub oi: u64,
    /// Traded volume
    pub volume: u64,
    /// Exchange timestamp; receive time is used when absent
    pub timestamp: Option<DateTime<Utc>>,
}

impl OptionQuote {
    /// Contract identity of this quote
    #[must_use]
    pub fn key(&self) -> ContractKey {
        ContractKey::new(self.strike, self.side)
    }

    /// Mid price when both sides of the book are present
    #[must_use]
    pub fn mid(&self) -> Option<f64> {
        (self.bid > 0.0 && self.ask >= self.bid).then(|| (self.bid + self.ask) / 2.0)
    }

    /// Price used for IV: last trade, else the mid of a two-sided book
    #[must_use]
    pub fn reference_price(&self) -> f64 {
        if self.ltp > 0.0 {
            self.ltp
        } else {
            self.mid().unwrap_or(self.ltp)
        }
    }
}

/// Open interest observation retained across cycles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OiRecord {
    /// Open interest
    pub oi: u64,
    /// Volume at the time of the observation
    pub volume: u64,
    /// Observation time
    pub timestamp: DateTime<Utc>,
}

/// Greeks for one contract at one instant, with the previous cycle's values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreeksSnapshot {
    /// Strike price
    pub strike: f64,
    /// Call or put
    pub side: OptionSide,
    /// Delta
    pub delta: f64,
    /// Gamma
    pub gamma: f64,
    /// Theta per calendar day
    pub theta: f64,
    /// Vega per vol point
    pub vega: f64,
    /// Previous cycle delta
    pub prev_delta: Option<f64>,
    /// Previous cycle gamma
    pub prev_gamma: Option<f64>,
    /// Previous cycle theta
    pub prev_theta: Option<f64>,
    /// Previous cycle vega
    pub prev_vega: Option<f64>,
    /// Implied volatility as a fraction (0.15 = 15%)
    pub implied_volatility: f64,
    /// Origin of the implied volatility
    pub iv_source: IvSource,
    /// Last traded price
    pub last_price: f64,
    /// Time the underlying quote was observed
    pub timestamp: DateTime<Utc>,
}

impl GreeksSnapshot {
    /// Contract identity of this snapshot
    #[must_use]
    pub fn key(&self) -> ContractKey {
        ContractKey::new(self.strike, self.side)
    }

    /// Carry the given snapshot's values over as this snapshot's previous values
    pub fn link_previous(&mut self, previous: &GreeksSnapshot) {
        self.prev_delta = Some(previous.delta);
        self.prev_gamma = Some(previous.gamma);
        self.prev_theta = Some(previous.theta);
        self.prev_vega = Some(previous.vega);
    }

    /// Whether previous-cycle values are available
    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.prev_delta.is_some()
    }

    /// Seconds elapsed between the observation and `now`
    #[must_use]
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 1000.0
    }

    /// Whether the Greeks satisfy the per-side invariants
    #[must_use]
    pub fn satisfies_invariants(&self) -> bool {
        let (lo, hi) = self.side.delta_range();
        self.delta.is_finite()
            && (lo..=hi).contains(&self.delta)
            && self.gamma.is_finite()
            && self.gamma >= 0.0
            && self.theta.is_finite()
            && self.vega.is_finite()
    }
}

/// Per-contract Greeks, ordered by strike then side
pub type GreeksMap = BTreeMap<ContractKey, GreeksSnapshot>;

/// Per-contract open interest
pub type OiMap = FxHashMap<ContractKey, OiRecord>;

/// Tradable universe the engine is tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    /// Underlying symbol, e.g. NIFTY
    pub underlying: String,
    /// At-the-money strike
    pub atm_strike: f64,
    /// Calendar days to expiry
    pub days_to_expiry: f64,
}

/// Everything one update cycle consumes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainUpdate {
    /// Chain rows; the strike set may change between cycles
    pub quotes: Vec<OptionQuote>,
    /// Broker Greeks keyed by contract
    pub broker_greeks: Option<FxHashMap<ContractKey, BrokerGreeks>>,
    /// Broker implied volatility keyed by contract
    pub broker_iv: Option<FxHashMap<ContractKey, f64>>,
    /// Underlying spot; the ATM strike stands in when absent
    pub spot: Option<f64>,
}

/// Source of chain updates for the background refresh loop
pub trait ChainSource: Send + Sync {
    /// Latest materialized chain, if one is available
    fn next_update(&self) -> Option<ChainUpdate>;
}
