//! Signal engine configuration

use crate::black_scholes::IvSolverParams;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Indian T-bill rate ~6.5%
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.065;

/// Environment variable prefix for overrides (e.g. `GREEKS_ENGINE__HEALTH__STALE_AFTER_SECS`)
pub const ENV_PREFIX: &str = "GREEKS_ENGINE";

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Annualized risk-free rate used for pricing
    pub risk_free_rate: f64,

    /// Background refresh interval in milliseconds
    pub refresh_interval_ms: u64,

    /// Greeks calculator settings
    pub calculator: CalculatorConfig,

    /// Change/zone analyzer settings
    pub zones: ZoneConfig,

    /// Health monitor settings
    pub health: HealthConfig,

    /// OI-sync validator settings
    pub oi_sync: OiSyncConfig,

    /// Signal derivation settings
    pub signal: SignalConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            refresh_interval_ms: 5_000,
            calculator: CalculatorConfig::default(),
            zones: ZoneConfig::default(),
            health: HealthConfig::default(),
            oi_sync: OiSyncConfig::default(),
            signal: SignalConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file, with environment overrides
    pub fn from_file(path: &str) -> EngineResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from defaults and environment only
    pub fn from_env() -> EngineResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Refresh interval as a duration
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Reject out-of-range settings
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: &str| Err(EngineError::InvalidConfig(msg.to_string()));

        if !self.risk_free_rate.is_finite() || !(-0.05..=0.5).contains(&self.risk_free_rate) {
            return invalid("risk_free_rate must be within [-0.05, 0.5]");
        }
        if self.refresh_interval_ms == 0 {
            return invalid("refresh_interval_ms must be positive");
        }

        let solver = &self.calculator.solver;
        if !(solver.min_volatility > 0.0 && solver.min_volatility < solver.max_volatility) {
            return invalid("calculator.solver volatility bounds must satisfy 0 < min < max");
        }
        if solver.max_iterations == 0 || solver.price_tolerance <= 0.0 {
            return invalid("calculator.solver needs a positive tolerance and iteration cap");
        }
        if self.calculator.max_broker_iv <= 0.0 {
            return invalid("calculator.max_broker_iv must be positive");
        }

        if self.health.history_capacity == 0 {
            return invalid("health.history_capacity must be positive");
        }
        for (name, ratio) in [
            ("health.stale_ratio_limit", self.health.stale_ratio_limit),
            ("health.frozen_ratio_limit", self.health.frozen_ratio_limit),
            ("health.moderate_error_ratio", self.health.moderate_error_ratio),
            ("health.heavy_error_ratio", self.health.heavy_error_ratio),
            ("oi_sync.fake_ratio_limit", self.oi_sync.fake_ratio_limit),
            ("oi_sync.smart_money_ratio", self.oi_sync.smart_money_ratio),
            ("oi_sync.theta_danger_ratio", self.oi_sync.theta_danger_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(EngineError::InvalidConfig(format!("{name} must be within [0, 1]")));
            }
        }

        if self.signal.gamma_norm <= 0.0 || self.signal.theta_norm <= 0.0 {
            return invalid("signal normalization constants must be positive");
        }
        if self.signal.bearish_threshold >= self.signal.bullish_threshold {
            return invalid("signal.bearish_threshold must be below signal.bullish_threshold");
        }

        Ok(())
    }
}

/// Greeks calculator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorConfig {
    /// Implied volatility search parameters
    pub solver: IvSolverParams,

    /// Highest broker IV accepted, as a fraction (2.0 = 200%)
    pub max_broker_iv: f64,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            solver: IvSolverParams::default(),
            max_broker_iv: 2.0,
        }
    }
}

/// Change/zone analyzer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// Minimum absolute Greek change counted as movement
    pub movement_epsilon: f64,

    /// Call/put delta gap treated as a balanced battle
    pub delta_battle_tolerance: f64,

    /// Gamma above which the zone is unsafe
    pub gamma_danger_threshold: f64,

    /// Absolute daily theta above which the zone is unsafe
    pub theta_danger_threshold: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            movement_epsilon: 0.001,
            delta_battle_tolerance: 0.02,
            gamma_danger_threshold: 0.003,
            theta_danger_threshold: 30.0,
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Snapshot age after which a contract counts as stale
    pub stale_after_secs: f64,

    /// Fewest snapshots needed for a verdict
    pub min_snapshots: usize,

    /// Stale share above which the chain is STALE
    pub stale_ratio_limit: f64,

    /// Frozen share above which the chain is DEGRADED
    pub frozen_ratio_limit: f64,

    /// Largest Greek change still counted as frozen
    pub frozen_epsilon: f64,

    /// Relative average-IV change flagged as a spike
    pub iv_spike_threshold: f64,

    /// Error share from which the chain is DEGRADED
    pub moderate_error_ratio: f64,

    /// Error share above which the chain is UNHEALTHY
    pub heavy_error_ratio: f64,

    /// Lowest IV accepted by the sanity check
    pub min_sane_iv: f64,

    /// Highest IV accepted by the sanity check
    pub max_sane_iv: f64,

    /// Reports retained for trend queries
    pub history_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 60.0,
            min_snapshots: 4,
            stale_ratio_limit: 0.5,
            frozen_ratio_limit: 0.7,
            frozen_epsilon: 0.001,
            iv_spike_threshold: 0.2,
            moderate_error_ratio: 0.1,
            heavy_error_ratio: 0.5,
            min_sane_iv: 0.01,
            max_sane_iv: 2.0,
            history_capacity: 100,
        }
    }
}

/// OI-sync validator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OiSyncConfig {
    /// Relative change below which a series is FLAT
    pub direction_threshold: f64,

    /// Gamma increase counted as expansion
    pub gamma_expansion_threshold: f64,

    /// Theta change below which a theta exit fires
    pub theta_spike_threshold: f64,

    /// Fake-move share above which the chain is AVOID
    pub fake_ratio_limit: f64,

    /// Smart-money share above which the chain is PROCEED
    pub smart_money_ratio: f64,

    /// Theta-danger share above which the chain is CAUTION
    pub theta_danger_ratio: f64,
}

impl Default for OiSyncConfig {
    fn default() -> Self {
        Self {
            direction_threshold: 0.001,
            gamma_expansion_threshold: 0.001,
            theta_spike_threshold: -0.05,
            fake_ratio_limit: 0.3,
            smart_money_ratio: 0.4,
            theta_danger_ratio: 0.2,
        }
    }
}

/// Signal derivation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Gamma mapped to an acceleration score of 1.0
    pub gamma_norm: f64,

    /// Absolute daily theta mapped to a theta pressure of 1.0
    pub theta_norm: f64,

    /// Bias above which calls are preferred
    pub bullish_threshold: f64,

    /// Bias below which puts are preferred
    pub bearish_threshold: f64,

    /// Theta pressure at or above which the signal is forced neutral
    pub theta_override: f64,

    /// Relative IV change classified as CRUSHING / SURGING
    pub iv_regime_change: f64,

    /// Average IV below which volatility is STABLE_LOW
    pub iv_low_bucket: f64,

    /// Average IV below which volatility is STABLE_MID
    pub iv_high_bucket: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            gamma_norm: 0.002,
            theta_norm: 25.0,
            bullish_threshold: 0.6,
            bearish_threshold: 0.4,
            theta_override: 0.7,
            iv_regime_change: 0.1,
            iv_low_bucket: 0.12,
            iv_high_bucket: 0.25,
        }
    }
}
