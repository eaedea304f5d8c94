use crate::common::{aged_map, init_test_env, market, snapshot};
use approx::assert_abs_diff_eq;
use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use greeks_signal_engine::config::HealthConfig;
use greeks_signal_engine::health::SanityIssue;
use greeks_signal_engine::{
    GreeksMap, HealthMonitor, HealthStatus, HealthTrend, IvSource, OptionSide,
};
use rstest::*;

#[fixture]
fn monitor() -> HealthMonitor {
    init_test_env();
    HealthMonitor::new(HealthConfig::default())
}

fn with_iv(greeks: &GreeksMap, iv: f64) -> GreeksMap {
    greeks
        .iter()
        .map(|(k, s)| {
            let mut s = s.clone();
            s.implied_volatility = iv;
            (*k, s)
        })
        .collect()
}

#[rstest]
fn test_fresh_chain_is_healthy(monitor: HealthMonitor) {
    let now = Utc::now();
    let report = monitor.evaluate("NIFTY", &aged_map(10, 0, 0, now), now);

    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.can_trade);
    assert_eq!(report.snapshot_count, 10);
    assert_abs_diff_eq!(report.average_iv.unwrap(), market::IV, epsilon = 1e-12);
    assert_eq!(report.iv_change, None);
}

#[rstest]
fn test_estimated_iv_only_counts_without_firmer_sources(monitor: HealthMonitor) {
    let now = Utc::now();
    let mut greeks = aged_map(6, 0, 0, now);
    for (i, snap) in greeks.values_mut().enumerate() {
        if i < 2 {
            snap.iv_source = IvSource::Estimated;
            snap.implied_volatility = 0.55;
        }
    }
    let report = monitor.evaluate("NIFTY", &greeks, now);
    assert_abs_diff_eq!(report.average_iv.unwrap(), market::IV, epsilon = 1e-12);

    for snap in greeks.values_mut() {
        snap.iv_source = IvSource::Estimated;
    }
    let report = monitor.evaluate("BANKNIFTY", &greeks, now);
    assert!(report.average_iv.is_some());
    assert_ne!(report.status, HealthStatus::IvMissing);
}

#[rstest]
fn test_mostly_stale_chain_blocks_trading(monitor: HealthMonitor) {
    let now = Utc::now();
    let report = monitor.evaluate("NIFTY", &aged_map(10, 9, 120, now), now);

    assert_eq!(report.status, HealthStatus::Stale);
    assert!(!report.can_trade);
    assert_eq!(report.stale_count, 9);
    assert_abs_diff_eq!(report.stale_ratio(), 0.9, epsilon = 1e-12);
}

#[rstest]
fn test_half_stale_is_not_stale(monitor: HealthMonitor) {
    let now = Utc::now();
    let report = monitor.evaluate("NIFTY", &aged_map(10, 5, 120, now), now);
    assert_ne!(report.status, HealthStatus::Stale);
}

#[rstest]
fn test_insufficient_data(monitor: HealthMonitor) {
    let now = Utc::now();
    let report = monitor.evaluate("NIFTY", &aged_map(3, 3, 120, now), now);

    // Insufficient data wins over staleness
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(report.recovery_hint.contains("insufficient"));
}

#[rstest]
fn test_no_usable_iv(monitor: HealthMonitor) {
    let now = Utc::now();
    let report = monitor.evaluate("NIFTY", &with_iv(&aged_map(6, 6, 120, now), 0.0), now);

    // IV missing is checked before staleness
    assert_eq!(report.status, HealthStatus::IvMissing);
    assert_eq!(report.average_iv, None);
    assert!(!report.can_trade);
}

#[rstest]
#[case(6, HealthStatus::Unhealthy)]
#[case(1, HealthStatus::Degraded)]
#[case(0, HealthStatus::Healthy)]
fn test_calculation_errors(
    monitor: HealthMonitor,
    #[case] errors: usize,
    #[case] expected: HealthStatus,
) {
    let now = Utc::now();
    let greeks: GreeksMap = aged_map(10, 0, 0, now)
        .into_iter()
        .enumerate()
        .map(|(i, (k, mut s))| {
            if i < errors {
                s = snapshot(s.strike, s.side, 0.5, 0.0, now);
            }
            (k, s)
        })
        .collect();

    let report = monitor.evaluate("NIFTY", &greeks, now);
    assert_eq!(report.calculation_errors, errors);
    assert_eq!(report.status, expected);
}

#[rstest]
fn test_frozen_chain_degraded(monitor: HealthMonitor) {
    let now = Utc::now();
    let greeks: GreeksMap = aged_map(10, 0, 0, now)
        .into_iter()
        .map(|(k, mut s)| {
            let prev = s.clone();
            s.link_previous(&prev);
            (k, s)
        })
        .collect();

    let report = monitor.evaluate("NIFTY", &greeks, now);
    assert_eq!(report.frozen_greeks, 10);
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.can_trade);
}

#[rstest]
fn test_iv_spike_grades(monitor: HealthMonitor) {
    let now = Utc::now();
    let base = aged_map(10, 0, 0, now);

    monitor.evaluate("NIFTY", &with_iv(&base, 0.15), now);

    let moderate = monitor.evaluate("NIFTY", &with_iv(&base, 0.20), now);
    assert_abs_diff_eq!(moderate.iv_change.unwrap(), 1.0 / 3.0, epsilon = 1e-9);
    assert_eq!(moderate.status, HealthStatus::Degraded);

    let severe = monitor.evaluate("NIFTY", &with_iv(&base, 0.30), now);
    assert_eq!(severe.status, HealthStatus::Unhealthy);
    assert!(!severe.can_trade);
}

#[rstest]
fn test_iv_baseline_is_per_underlying(monitor: HealthMonitor) {
    let now = Utc::now();
    let base = aged_map(10, 0, 0, now);

    monitor.evaluate("NIFTY", &with_iv(&base, 0.15), now);
    let bank = monitor.evaluate("BANKNIFTY", &with_iv(&base, 0.40), now);
    assert_eq!(bank.iv_change, None);
    assert_eq!(bank.status, HealthStatus::Healthy);
}

#[test]
fn test_history_is_bounded() {
    let monitor = HealthMonitor::new(HealthConfig {
        history_capacity: 3,
        ..HealthConfig::default()
    });
    let now = Utc::now();
    for _ in 0..5 {
        monitor.evaluate("NIFTY", &aged_map(10, 0, 0, now), now);
    }

    assert_eq!(monitor.history(10).len(), 3);
    assert_eq!(monitor.history(2).len(), 2);
    assert_eq!(monitor.health_summary().reports, 3);
}

#[rstest]
fn test_summary_trend(monitor: HealthMonitor) {
    let now = Utc::now();
    for _ in 0..3 {
        monitor.evaluate("NIFTY", &aged_map(10, 9, 120, now), now);
    }
    for _ in 0..3 {
        monitor.evaluate("NIFTY", &aged_map(10, 0, 0, now), now);
    }

    let summary = monitor.health_summary();
    assert_eq!(summary.reports, 6);
    assert_eq!(summary.stale, 3);
    assert_eq!(summary.healthy, 3);
    assert_eq!(summary.latest_status, Some(HealthStatus::Healthy));
    assert_eq!(summary.trend, HealthTrend::Improving);
    assert_abs_diff_eq!(summary.tradeable_ratio, 0.5, epsilon = 1e-12);
    assert_eq!(monitor.latest().map(|r| r.status), Some(HealthStatus::Healthy));
}

#[rstest]
fn test_sanity_check(monitor: HealthMonitor) {
    let now = Utc::now();

    let good = snapshot(21500.0, OptionSide::Call, 0.52, market::IV, now);
    assert!(monitor.check_greek_sanity(&good, now).passed);

    let mut bad = snapshot(21500.0, OptionSide::Put, 0.3, 3.5, now - Duration::seconds(300));
    bad.gamma = -0.001;
    let check = monitor.check_greek_sanity(&bad, now);
    assert!(!check.passed);
    assert!(check.issues.contains(&SanityIssue::DeltaOutOfRange(0.3)));
    assert!(check.issues.contains(&SanityIssue::NegativeGamma(-0.001)));
    assert!(check.issues.contains(&SanityIssue::IvOutOfBounds(3.5)));
    assert!(check.issues.iter().any(|i| matches!(i, SanityIssue::Stale { .. })));

    let fallback = snapshot(21500.0, OptionSide::Call, 0.5, 0.0, now);
    let check = monitor.check_greek_sanity(&fallback, now);
    assert_matches!(check.issues.as_slice(), [SanityIssue::FallbackValues]);
}
