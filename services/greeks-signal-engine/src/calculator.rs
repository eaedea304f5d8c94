//! Greeks calculator
//!
//! Turns one chain row into a [`GreeksSnapshot`]. Broker-supplied Greeks and
//! IV are preferred when they pass sanity checks; otherwise implied
//! volatility is solved from the last traded price and Greeks are derived
//! analytically. Any failure degrades to conservative defaults tagged
//! [`IvSource::ErrorFallback`] so one bad strike never aborts a batch.

use crate::black_scholes::{BlackScholes, BsGreeks, DAYS_PER_YEAR};
use crate::config::CalculatorConfig;
use crate::error::CalcFailure;
use crate::types::{BrokerGreeks, GreeksSnapshot, IvSource, OptionSide};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Broker IV above this is read as percentage points
const PERCENT_IV_CUTOFF: f64 = 2.0;

/// Inputs for one contract
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalcRequest {
    /// Strike price
    pub strike: f64,
    /// Call or put
    pub side: OptionSide,
    /// Underlying spot
    pub spot: f64,
    /// Calendar days to expiry
    pub days_to_expiry: f64,
    /// Last traded price
    pub last_price: f64,
    /// Annualized risk-free rate
    pub risk_free_rate: f64,
    /// Broker Greeks, if published
    pub broker_greeks: Option<BrokerGreeks>,
    /// Broker implied volatility (fraction or percentage points)
    pub broker_iv: Option<f64>,
    /// Observation time stamped onto the snapshot
    pub timestamp: DateTime<Utc>,
}

/// Result tag of one calculation
#[derive(Debug, Clone, PartialEq)]
pub enum CalcStatus {
    /// Greeks are usable
    Ok,
    /// Defaults in use; carries the reason
    Error(CalcFailure),
}

impl CalcStatus {
    /// Whether the calculation succeeded
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Calculator counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculatorStats {
    /// Calculations performed
    pub total: u64,
    /// Served from broker data
    pub broker: u64,
    /// Solved to tolerance
    pub calculated: u64,
    /// Accepted at the iteration cap
    pub estimated: u64,
    /// Fell back to defaults
    pub errors: u64,
    /// errors / total
    pub error_rate: f64,
}

/// Greeks calculator with running statistics
#[derive(Debug)]
pub struct GreeksCalculator {
    config: CalculatorConfig,
    total: AtomicU64,
    broker: AtomicU64,
    calculated: AtomicU64,
    estimated: AtomicU64,
    errors: AtomicU64,
}

impl GreeksCalculator {
    /// Create a calculator
    #[must_use]
    pub fn new(config: CalculatorConfig) -> Self {
        Self {
            config,
            total: AtomicU64::new(0),
            broker: AtomicU64::new(0),
            calculated: AtomicU64::new(0),
            estimated: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Calculate Greeks for one contract. Never panics.
    pub fn calculate(&self, req: &CalcRequest) -> (GreeksSnapshot, CalcStatus) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let time = req.days_to_expiry / DAYS_PER_YEAR;

        if !time.is_finite() || time <= 0.0 {
            return self.fallback(req, CalcFailure::NonPositiveExpiry);
        }
        if !(req.spot.is_finite() && req.spot > 0.0 && req.strike.is_finite() && req.strike > 0.0) {
            return self.fallback(
                req,
                CalcFailure::InvalidInput(format!("spot {} / strike {}", req.spot, req.strike)),
            );
        }

        let broker_iv = req
            .broker_iv
            .and_then(|iv| normalize_broker_iv(iv, self.config.max_broker_iv));
        if req.broker_iv.is_some() && broker_iv.is_none() {
            debug!(
                strike = req.strike,
                side = %req.side,
                iv = ?req.broker_iv,
                "Broker IV rejected"
            );
        }

        if let Some(iv) = broker_iv {
            let greeks = match req.broker_greeks {
                Some(broker) => match validate_broker_greeks(req.side, &broker) {
                    Ok(()) => BsGreeks {
                        delta: broker.delta,
                        gamma: broker.gamma,
                        theta: broker.theta,
                        vega: broker.vega,
                    },
                    Err(reason) => {
                        debug!(
                            strike = req.strike,
                            side = %req.side,
                            %reason,
                            "Broker Greeks rejected"
                        );
                        self.analytic(req, iv, time)
                    }
                },
                None => self.analytic(req, iv, time),
            };
            self.broker.fetch_add(1, Ordering::Relaxed);
            return (self.snapshot(req, greeks, iv, IvSource::Broker), CalcStatus::Ok);
        }

        match BlackScholes::implied_volatility(
            req.side,
            req.spot,
            req.strike,
            req.risk_free_rate,
            time,
            req.last_price,
            &self.config.solver,
        ) {
            Ok(solution) => {
                let source = if solution.converged {
                    self.calculated.fetch_add(1, Ordering::Relaxed);
                    IvSource::Calculated
                } else {
                    self.estimated.fetch_add(1, Ordering::Relaxed);
                    IvSource::Estimated
                };
                let greeks = self.analytic(req, solution.volatility, time);
                (self.snapshot(req, greeks, solution.volatility, source), CalcStatus::Ok)
            }
            Err(failure) => self.fallback(req, failure),
        }
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> CalculatorStats {
        let total = self.total.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        CalculatorStats {
            total,
            broker: self.broker.load(Ordering::Relaxed),
            calculated: self.calculated.load(Ordering::Relaxed),
            estimated: self.estimated.load(Ordering::Relaxed),
            errors,
            error_rate: if total > 0 { errors as f64 / total as f64 } else { 0.0 },
        }
    }

    fn analytic(&self, req: &CalcRequest, volatility: f64, time: f64) -> BsGreeks {
        BlackScholes::calculate_greeks(
            req.side,
            req.spot,
            req.strike,
            req.risk_free_rate,
            volatility,
            time,
        )
    }

    fn snapshot(
        &self,
        req: &CalcRequest,
        greeks: BsGreeks,
        iv: f64,
        source: IvSource,
    ) -> GreeksSnapshot {
        GreeksSnapshot {
            strike: req.strike,
            side: req.side,
            delta: greeks.delta,
            gamma: greeks.gamma,
            theta: greeks.theta,
            vega: greeks.vega,
            prev_delta: None,
            prev_gamma: None,
            prev_theta: None,
            prev_vega: None,
            implied_volatility: iv,
            iv_source: source,
            last_price: req.last_price,
            timestamp: req.timestamp,
        }
    }

    fn fallback(&self, req: &CalcRequest, failure: CalcFailure) -> (GreeksSnapshot, CalcStatus) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        debug!(
            strike = req.strike,
            side = %req.side,
            %failure,
            "Greeks calculation fell back to defaults"
        );

        let greeks = BsGreeks {
            delta: req.side.fallback_delta(),
            ..BsGreeks::default()
        };
        (
            self.snapshot(req, greeks, 0.0, IvSource::ErrorFallback),
            CalcStatus::Error(failure),
        )
    }
}

/// Sanity-check broker Greeks for the given side
pub fn validate_broker_greeks(side: OptionSide, greeks: &BrokerGreeks) -> Result<(), String> {
    let (lo, hi) = side.delta_range();
    if !greeks.delta.is_finite() || greeks.delta < lo || greeks.delta > hi {
        return Err(format!("delta {} outside [{lo}, {hi}]", greeks.delta));
    }
    if !greeks.gamma.is_finite() || greeks.gamma < 0.0 {
        return Err(format!("gamma {} negative or not finite", greeks.gamma));
    }
    if !greeks.theta.is_finite() {
        return Err("theta not finite".to_string());
    }
    if !greeks.vega.is_finite() {
        return Err("vega not finite".to_string());
    }
    Ok(())
}

/// Normalize a broker IV to a fraction, rejecting values outside `[0, max_iv]`
///
/// Values above 2.0 and up to 200.0 are percentage points ("15.3" means 15.3%).
#[must_use]
pub fn normalize_broker_iv(iv: f64, max_iv: f64) -> Option<f64> {
    if !iv.is_finite() || iv <= 0.0 {
        return None;
    }
    let fraction = if iv > PERCENT_IV_CUTOFF && iv <= PERCENT_IV_CUTOFF * 100.0 {
        iv / 100.0
    } else {
        iv
    };
    (fraction <= max_iv).then_some(fraction)
}
