//! Strategy signal: the engine's single output contract
//!
//! Every bounded field is clamped when the signal is built. NaN collapses to
//! the field's neutral value, so construction can never fail.

use crate::config::SignalConfig;
use crate::health::HealthStatus;
use crate::zones::MomentumTendency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Volatility regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityState {
    /// IV collapsing
    Crushing,
    /// Low and steady
    StableLow,
    /// Normal and steady
    StableMid,
    /// High and steady
    StableHigh,
    /// IV expanding
    Surging,
}

impl VolatilityState {
    /// Regime from the chain's mean IV and its change since the last cycle
    #[must_use]
    pub fn classify(
        average_iv: Option<f64>,
        iv_change: Option<f64>,
        config: &SignalConfig,
    ) -> Self {
        match iv_change {
            Some(change) if change <= -config.iv_regime_change => return Self::Crushing,
            Some(change) if change >= config.iv_regime_change => return Self::Surging,
            _ => {}
        }
        match average_iv {
            Some(iv) if iv < config.iv_low_bucket => Self::StableLow,
            Some(iv) if iv >= config.iv_high_bucket => Self::StableHigh,
            _ => Self::StableMid,
        }
    }
}

/// Final trade recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeRecommendation {
    /// Go long calls
    BuyCall,
    /// Go long puts
    BuyPut,
    /// Stay out
    Avoid,
    /// No edge
    Neutral,
}

/// Immutable signal published once per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySignal {
    direction_bias: f64,
    acceleration_score: f64,
    theta_pressure: f64,
    volatility_state: VolatilityState,
    is_data_healthy: bool,
    is_tradeable: bool,
    fake_move_detected: bool,
    recommendation: TradeRecommendation,
    confidence: f64,
    momentum: MomentumTendency,
    health_status: Option<HealthStatus>,
    cycle: u64,
    generated_at: DateTime<Utc>,
}

impl Default for StrategySignal {
    fn default() -> Self {
        Self::neutral()
    }
}

fn unit(value: f64, neutral: f64) -> f64 {
    if value.is_nan() { neutral } else { value.clamp(0.0, 1.0) }
}

impl StrategySignal {
    /// Signal published before the first successful cycle: not tradeable, no edge
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            direction_bias: 0.5,
            acceleration_score: 0.0,
            theta_pressure: 0.0,
            volatility_state: VolatilityState::StableMid,
            is_data_healthy: false,
            is_tradeable: false,
            fake_move_detected: false,
            recommendation: TradeRecommendation::Neutral,
            confidence: 0.0,
            momentum: MomentumTendency::Flat,
            health_status: None,
            cycle: 0,
            generated_at: DateTime::<Utc>::default(),
        }
    }

    /// Start building a signal
    #[must_use]
    pub fn builder() -> StrategySignalBuilder {
        StrategySignalBuilder { signal: Self::neutral() }
    }

    /// 0 = bearish, 1 = bullish
    #[must_use]
    pub const fn direction_bias(&self) -> f64 {
        self.direction_bias
    }

    /// Gamma-driven acceleration, 0..1
    #[must_use]
    pub const fn acceleration_score(&self) -> f64 {
        self.acceleration_score
    }

    /// Time-decay pressure, 0..1
    #[must_use]
    pub const fn theta_pressure(&self) -> f64 {
        self.theta_pressure
    }

    /// Volatility regime
    #[must_use]
    pub const fn volatility_state(&self) -> VolatilityState {
        self.volatility_state
    }

    /// Whether the data behind this signal passed health checks
    #[must_use]
    pub const fn is_data_healthy(&self) -> bool {
        self.is_data_healthy
    }

    /// Whether acting on this signal is allowed
    #[must_use]
    pub const fn is_tradeable(&self) -> bool {
        self.is_tradeable
    }

    /// Whether a fake move dominated the chain
    #[must_use]
    pub const fn fake_move_detected(&self) -> bool {
        self.fake_move_detected
    }

    /// Final recommendation
    #[must_use]
    pub const fn recommendation(&self) -> TradeRecommendation {
        self.recommendation
    }

    /// Confidence, 0..1
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Secondary delta-momentum reading
    #[must_use]
    pub const fn momentum(&self) -> MomentumTendency {
        self.momentum
    }

    /// Health verdict of the cycle, `None` before the first cycle
    #[must_use]
    pub const fn health_status(&self) -> Option<HealthStatus> {
        self.health_status
    }

    /// Cycle number that produced this signal
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Generation time
    #[must_use]
    pub const fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

/// Builder that clamps every bounded field
#[derive(Debug, Clone)]
pub struct StrategySignalBuilder {
    signal: StrategySignal,
}

impl StrategySignalBuilder {
    /// Direction bias, clamped to [0, 1]
    #[must_use]
    pub fn direction_bias(mut self, value: f64) -> Self {
        self.signal.direction_bias = unit(value, 0.5);
        self
    }

    /// Acceleration score, clamped to [0, 1]
    #[must_use]
    pub fn acceleration_score(mut self, value: f64) -> Self {
        self.signal.acceleration_score = unit(value, 0.0);
        self
    }

    /// Theta pressure, clamped to [0, 1]
    #[must_use]
    pub fn theta_pressure(mut self, value: f64) -> Self {
        self.signal.theta_pressure = unit(value, 0.0);
        self
    }

    /// Volatility regime
    #[must_use]
    pub fn volatility_state(mut self, value: VolatilityState) -> Self {
        self.signal.volatility_state = value;
        self
    }

    /// Data health flag
    #[must_use]
    pub fn data_healthy(mut self, value: bool) -> Self {
        self.signal.is_data_healthy = value;
        self
    }

    /// Tradeable flag
    #[must_use]
    pub fn tradeable(mut self, value: bool) -> Self {
        self.signal.is_tradeable = value;
        self
    }

    /// Fake move flag
    #[must_use]
    pub fn fake_move_detected(mut self, value: bool) -> Self {
        self.signal.fake_move_detected = value;
        self
    }

    /// Recommendation
    #[must_use]
    pub fn recommendation(mut self, value: TradeRecommendation) -> Self {
        self.signal.recommendation = value;
        self
    }

    /// Confidence, clamped to [0, 1]
    #[must_use]
    pub fn confidence(mut self, value: f64) -> Self {
        self.signal.confidence = unit(value, 0.0);
        self
    }

    /// Momentum reading
    #[must_use]
    pub fn momentum(mut self, value: MomentumTendency) -> Self {
        self.signal.momentum = value;
        self
    }

    /// Health verdict
    #[must_use]
    pub fn health_status(mut self, value: HealthStatus) -> Self {
        self.signal.health_status = Some(value);
        self
    }

    /// Cycle number
    #[must_use]
    pub fn cycle(mut self, value: u64) -> Self {
        self.signal.cycle = value;
        self
    }

    /// Generation time
    #[must_use]
    pub fn generated_at(mut self, value: DateTime<Utc>) -> Self {
        self.signal.generated_at = value;
        self
    }

    /// Finish the signal
    #[must_use]
    pub fn build(self) -> StrategySignal {
        self.signal
    }
}
