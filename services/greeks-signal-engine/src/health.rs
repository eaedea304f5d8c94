//! Greeks health monitor
//!
//! Classifies the freshness and sanity of a whole Greeks set once per cycle
//! and keeps a bounded history of reports for trend queries.

use crate::config::HealthConfig;
use crate::types::{GreeksMap, GreeksSnapshot, IvSource};
use crate::zones::GreekVelocity;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Health verdict for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// All checks passed
    Healthy,
    /// Usable with reduced confidence
    Degraded,
    /// Not usable
    Unhealthy,
    /// Too many old snapshots
    Stale,
    /// No usable implied volatility
    IvMissing,
}

impl HealthStatus {
    /// Whether trading may proceed under this verdict
    #[must_use]
    pub const fn allows_trading(self) -> bool {
        match self {
            Self::Healthy | Self::Degraded => true,
            Self::Unhealthy | Self::Stale | Self::IvMissing => false,
        }
    }
}

/// Health report for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreeksHealthReport {
    /// Verdict
    pub status: HealthStatus,
    /// Contracts evaluated
    pub snapshot_count: usize,
    /// Contracts older than the staleness threshold
    pub stale_count: usize,
    /// Contracts with history but no movement
    pub frozen_greeks: usize,
    /// Contracts on fallback values
    pub calculation_errors: usize,
    /// Mean IV over usable contracts
    pub average_iv: Option<f64>,
    /// Signed relative change of the mean IV against the previous cycle
    pub iv_change: Option<f64>,
    /// Magnitude of the IV change when it exceeds the spike threshold
    pub iv_spike: Option<f64>,
    /// Whether trading may proceed
    pub can_trade: bool,
    /// What would restore a healthy verdict
    pub recovery_hint: String,
    /// Evaluation time
    pub timestamp: DateTime<Utc>,
}

impl GreeksHealthReport {
    fn ratio(&self, count: usize) -> f64 {
        if self.snapshot_count == 0 {
            0.0
        } else {
            count as f64 / self.snapshot_count as f64
        }
    }

    /// Stale share of the chain
    #[must_use]
    pub fn stale_ratio(&self) -> f64 {
        self.ratio(self.stale_count)
    }

    /// Frozen share of the chain
    #[must_use]
    pub fn frozen_ratio(&self) -> f64 {
        self.ratio(self.frozen_greeks)
    }

    /// Fallback share of the chain
    #[must_use]
    pub fn error_ratio(&self) -> f64 {
        self.ratio(self.calculation_errors)
    }
}

/// Direction of health over the retained history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthTrend {
    /// Newer reports are tradeable more often
    Improving,
    /// No material change
    Stable,
    /// Newer reports are tradeable less often
    Deteriorating,
}

/// Trend view over the report history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Reports retained
    pub reports: usize,
    /// HEALTHY verdicts
    pub healthy: usize,
    /// DEGRADED verdicts
    pub degraded: usize,
    /// UNHEALTHY verdicts
    pub unhealthy: usize,
    /// STALE verdicts
    pub stale: usize,
    /// IV_MISSING verdicts
    pub iv_missing: usize,
    /// Share of reports that allowed trading
    pub tradeable_ratio: f64,
    /// Mean stale share
    pub average_stale_ratio: f64,
    /// Mean fallback share
    pub average_error_ratio: f64,
    /// Most recent verdict
    pub latest_status: Option<HealthStatus>,
    /// Older half vs newer half
    pub trend: HealthTrend,
}

/// Problem found by the per-contract sanity check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SanityIssue {
    /// Delta outside the side's range
    DeltaOutOfRange(f64),
    /// Negative gamma
    NegativeGamma(f64),
    /// Some Greek is NaN or infinite
    NonFiniteGreek,
    /// Snapshot older than the staleness threshold
    Stale {
        /// Age in seconds
        age_secs: f64,
    },
    /// IV outside configured bounds
    IvOutOfBounds(f64),
    /// Values are calculation fallbacks
    FallbackValues,
}

/// Result of the per-contract sanity check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityCheck {
    /// No issues found
    pub passed: bool,
    /// Issues found
    pub issues: Vec<SanityIssue>,
}

/// Health monitor service
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    /// Mean IV of the previous cycle per underlying
    previous_iv: RwLock<FxHashMap<String, f64>>,
    history: RwLock<VecDeque<GreeksHealthReport>>,
}

impl HealthMonitor {
    /// Create a health monitor
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        let capacity = config.history_capacity;
        Self {
            config,
            previous_iv: RwLock::new(FxHashMap::default()),
            history: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Evaluate one cycle's Greeks for an underlying and record the report
    pub fn evaluate(
        &self,
        underlying: &str,
        greeks: &GreeksMap,
        now: DateTime<Utc>,
    ) -> GreeksHealthReport {
        let cfg = &self.config;
        let snapshot_count = greeks.len();

        let stale_count = greeks
            .values()
            .filter(|s| s.age_seconds(now) > cfg.stale_after_secs)
            .count();
        let frozen_greeks = greeks
            .values()
            .filter_map(|s| GreekVelocity::from_snapshot(s, cfg.frozen_epsilon))
            .filter(|v| !v.has_movement)
            .count();
        let calculation_errors = greeks
            .values()
            .filter(|s| s.iv_source == IvSource::ErrorFallback)
            .count();

        // Estimated IVs only count when nothing firmer is available
        let usable_iv = |sources: &[IvSource]| -> Vec<f64> {
            greeks
                .values()
                .filter(|s| sources.contains(&s.iv_source) && s.implied_volatility > 0.0)
                .map(|s| s.implied_volatility)
                .collect()
        };
        let mut ivs = usable_iv(&[IvSource::Broker, IvSource::Calculated]);
        if ivs.is_empty() {
            ivs = usable_iv(&[IvSource::Estimated]);
        }
        let average_iv = (!ivs.is_empty()).then(|| ivs.iter().mean());

        let iv_change = {
            let mut previous = self.previous_iv.write();
            let change = match (average_iv, previous.get(underlying)) {
                (Some(current), Some(&prior)) if prior > 0.0 => Some((current - prior) / prior),
                _ => None,
            };
            if let Some(current) = average_iv {
                previous.insert(underlying.to_string(), current);
            }
            change
        };
        let iv_spike = iv_change
            .map(f64::abs)
            .filter(|magnitude| *magnitude > cfg.iv_spike_threshold);

        let mut report = GreeksHealthReport {
            status: HealthStatus::Healthy,
            snapshot_count,
            stale_count,
            frozen_greeks,
            calculation_errors,
            average_iv,
            iv_change,
            iv_spike,
            can_trade: true,
            recovery_hint: String::new(),
            timestamp: now,
        };

        let (status, hint) = self.classify(&report);
        report.status = status;
        report.can_trade = status.allows_trading();
        report.recovery_hint = hint;

        if report.can_trade {
            debug!(
                underlying,
                status = ?report.status,
                contracts = snapshot_count,
                stale = stale_count,
                frozen = frozen_greeks,
                errors = calculation_errors,
                "Greeks health evaluated"
            );
        } else {
            warn!(
                underlying,
                status = ?report.status,
                contracts = snapshot_count,
                stale = stale_count,
                errors = calculation_errors,
                iv_spike = ?report.iv_spike,
                hint = %report.recovery_hint,
                "Greeks health blocks trading"
            );
        }

        self.record(report.clone());
        report
    }

    /// First matching rule wins
    fn classify(&self, report: &GreeksHealthReport) -> (HealthStatus, String) {
        let cfg = &self.config;

        if report.snapshot_count < cfg.min_snapshots {
            return (
                HealthStatus::Unhealthy,
                format!(
                    "insufficient data: {} contracts, need at least {}",
                    report.snapshot_count, cfg.min_snapshots
                ),
            );
        }
        if report.average_iv.is_none() {
            return (
                HealthStatus::IvMissing,
                "no usable implied volatility; check last prices or broker IV feed".to_string(),
            );
        }
        if report.stale_ratio() > cfg.stale_ratio_limit {
            return (
                HealthStatus::Stale,
                format!(
                    "{} of {} contracts older than {}s; wait for a fresh snapshot",
                    report.stale_count, report.snapshot_count, cfg.stale_after_secs
                ),
            );
        }
        if let Some(spike) = report.iv_spike.filter(|s| *s > 2.0 * cfg.iv_spike_threshold) {
            return (
                HealthStatus::Unhealthy,
                format!(
                    "IV moved {:.1}% in one cycle; wait for volatility to settle",
                    spike * 100.0
                ),
            );
        }
        if report.error_ratio() > cfg.heavy_error_ratio {
            return (
                HealthStatus::Unhealthy,
                format!(
                    "{} of {} contracts on fallback Greeks; check prices and expiry",
                    report.calculation_errors, report.snapshot_count
                ),
            );
        }
        if report.frozen_ratio() > cfg.frozen_ratio_limit {
            return (
                HealthStatus::Degraded,
                format!(
                    "{} of {} contracts frozen; feed may be lagging",
                    report.frozen_greeks, report.snapshot_count
                ),
            );
        }
        if report.calculation_errors > 0 && report.error_ratio() >= cfg.moderate_error_ratio {
            return (
                HealthStatus::Degraded,
                format!("{} contracts on fallback Greeks", report.calculation_errors),
            );
        }
        if let Some(spike) = report.iv_spike {
            return (
                HealthStatus::Degraded,
                format!("IV moved {:.1}% in one cycle", spike * 100.0),
            );
        }

        (HealthStatus::Healthy, "none".to_string())
    }

    fn record(&self, report: GreeksHealthReport) {
        let mut history = self.history.write();
        if history.len() >= self.config.history_capacity {
            history.pop_front();
        }
        history.push_back(report);
    }

    /// Stateless per-contract check usable for filtering
    #[must_use]
    pub fn check_greek_sanity(&self, snapshot: &GreeksSnapshot, now: DateTime<Utc>) -> SanityCheck {
        let cfg = &self.config;
        let mut issues = Vec::new();

        if [snapshot.delta, snapshot.gamma, snapshot.theta, snapshot.vega]
            .iter()
            .any(|g| !g.is_finite())
        {
            issues.push(SanityIssue::NonFiniteGreek);
        } else {
            let (lo, hi) = snapshot.side.delta_range();
            if snapshot.delta < lo || snapshot.delta > hi {
                issues.push(SanityIssue::DeltaOutOfRange(snapshot.delta));
            }
            if snapshot.gamma < 0.0 {
                issues.push(SanityIssue::NegativeGamma(snapshot.gamma));
            }
        }

        let age_secs = snapshot.age_seconds(now);
        if age_secs > cfg.stale_after_secs {
            issues.push(SanityIssue::Stale { age_secs });
        }

        if snapshot.iv_source == IvSource::ErrorFallback {
            issues.push(SanityIssue::FallbackValues);
        } else if !(cfg.min_sane_iv..=cfg.max_sane_iv).contains(&snapshot.implied_volatility) {
            issues.push(SanityIssue::IvOutOfBounds(snapshot.implied_volatility));
        }

        SanityCheck {
            passed: issues.is_empty(),
            issues,
        }
    }

    /// Most recent report
    #[must_use]
    pub fn latest(&self) -> Option<GreeksHealthReport> {
        self.history.read().back().cloned()
    }

    /// Up to `n` most recent reports, oldest first
    #[must_use]
    pub fn history(&self, n: usize) -> Vec<GreeksHealthReport> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    /// Trend summary over the retained history
    #[must_use]
    pub fn health_summary(&self) -> HealthSummary {
        let history = self.history.read();
        let count_of = |status: HealthStatus| history.iter().filter(|r| r.status == status).count();
        let tradeable_share = |reports: &[&GreeksHealthReport]| {
            if reports.is_empty() {
                0.0
            } else {
                reports.iter().filter(|r| r.can_trade).count() as f64 / reports.len() as f64
            }
        };

        let all: Vec<&GreeksHealthReport> = history.iter().collect();
        let trend = if all.len() < 4 {
            HealthTrend::Stable
        } else {
            let (older, newer) = all.split_at(all.len() / 2);
            let delta = tradeable_share(newer) - tradeable_share(older);
            if delta > 0.1 {
                HealthTrend::Improving
            } else if delta < -0.1 {
                HealthTrend::Deteriorating
            } else {
                HealthTrend::Stable
            }
        };

        let (average_stale_ratio, average_error_ratio) = if all.is_empty() {
            (0.0, 0.0)
        } else {
            (
                all.iter().map(|r| r.stale_ratio()).mean(),
                all.iter().map(|r| r.error_ratio()).mean(),
            )
        };

        HealthSummary {
            reports: all.len(),
            healthy: count_of(HealthStatus::Healthy),
            degraded: count_of(HealthStatus::Degraded),
            unhealthy: count_of(HealthStatus::Unhealthy),
            stale: count_of(HealthStatus::Stale),
            iv_missing: count_of(HealthStatus::IvMissing),
            tradeable_ratio: tradeable_share(&all),
            average_stale_ratio,
            average_error_ratio,
            latest_status: all.last().map(|r| r.status),
            trend,
        }
    }
}
