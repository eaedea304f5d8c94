use crate::common::{init_test_env, market};
use approx::assert_abs_diff_eq;
use assert_matches::assert_matches;
use chrono::Utc;
use greeks_signal_engine::black_scholes::{BlackScholes, DAYS_PER_YEAR, IvSolverParams};
use greeks_signal_engine::config::CalculatorConfig;
use greeks_signal_engine::{
    BrokerGreeks, CalcFailure, CalcRequest, CalcStatus, GreeksCalculator, IvSource, OptionSide,
};
use rstest::*;

#[fixture]
fn calculator() -> GreeksCalculator {
    init_test_env();
    GreeksCalculator::new(CalculatorConfig::default())
}

fn request(side: OptionSide, strike: f64, last_price: f64) -> CalcRequest {
    CalcRequest {
        strike,
        side,
        spot: market::NIFTY_SPOT,
        days_to_expiry: market::DAYS,
        last_price,
        risk_free_rate: market::RATE,
        broker_greeks: None,
        broker_iv: None,
        timestamp: Utc::now(),
    }
}

fn fair_price(side: OptionSide, strike: f64, vol: f64) -> f64 {
    let time = market::DAYS / DAYS_PER_YEAR;
    BlackScholes::price(side, market::NIFTY_SPOT, strike, market::RATE, vol, time)
}

#[rstest]
fn test_solves_iv_from_last_price(calculator: GreeksCalculator) {
    let req = request(OptionSide::Call, 21500.0, fair_price(OptionSide::Call, 21500.0, 0.15));
    let (snap, status) = calculator.calculate(&req);

    assert!(status.is_ok());
    assert_eq!(snap.iv_source, IvSource::Calculated);
    assert_abs_diff_eq!(snap.implied_volatility, 0.15, epsilon = 1e-3);
    assert!(snap.delta > 0.5 && snap.delta < 0.6);
    assert!(snap.satisfies_invariants());
    assert!(!snap.has_previous());
}

#[rstest]
fn test_broker_iv_used_when_valid(calculator: GreeksCalculator) {
    let mut req = request(OptionSide::Put, 21500.0, 90.0);
    req.broker_iv = Some(0.18);
    let (snap, status) = calculator.calculate(&req);

    assert!(status.is_ok());
    assert_eq!(snap.iv_source, IvSource::Broker);
    assert_eq!(snap.implied_volatility, 0.18);

    let expected = BlackScholes::calculate_greeks(
        OptionSide::Put,
        market::NIFTY_SPOT,
        21500.0,
        market::RATE,
        0.18,
        market::DAYS / DAYS_PER_YEAR,
    );
    assert_abs_diff_eq!(snap.delta, expected.delta, epsilon = 1e-12);
}

#[rstest]
fn test_percent_broker_iv_normalized(calculator: GreeksCalculator) {
    let mut req = request(OptionSide::Call, 21500.0, 90.0);
    req.broker_iv = Some(16.5);
    let (snap, _) = calculator.calculate(&req);

    assert_eq!(snap.iv_source, IvSource::Broker);
    assert_abs_diff_eq!(snap.implied_volatility, 0.165, epsilon = 1e-12);
}

#[rstest]
fn test_broker_greeks_taken_verbatim(calculator: GreeksCalculator) {
    let mut req = request(OptionSide::Call, 21500.0, 90.0);
    req.broker_iv = Some(0.15);
    req.broker_greeks = Some(BrokerGreeks { delta: 0.62, gamma: 0.0009, theta: -14.0, vega: 11.0 });
    let (snap, _) = calculator.calculate(&req);

    assert_eq!(snap.delta, 0.62);
    assert_eq!(snap.gamma, 0.0009);
    assert_eq!(snap.theta, -14.0);
    assert_eq!(snap.vega, 11.0);
}

#[rstest]
fn test_invalid_broker_greeks_recomputed(calculator: GreeksCalculator) {
    let mut req = request(OptionSide::Put, 21500.0, 90.0);
    req.broker_iv = Some(0.15);
    // Positive delta on a put
    req.broker_greeks = Some(BrokerGreeks { delta: 0.4, gamma: 0.0009, theta: -14.0, vega: 11.0 });
    let (snap, status) = calculator.calculate(&req);

    assert!(status.is_ok());
    assert_eq!(snap.iv_source, IvSource::Broker);
    assert!(snap.delta < 0.0);
}

#[rstest]
fn test_broker_greeks_ignored_without_broker_iv(calculator: GreeksCalculator) {
    let mut req = request(OptionSide::Call, 21500.0, fair_price(OptionSide::Call, 21500.0, 0.15));
    req.broker_greeks = Some(BrokerGreeks { delta: 0.9, gamma: 0.0009, theta: -14.0, vega: 11.0 });
    let (snap, _) = calculator.calculate(&req);

    assert_eq!(snap.iv_source, IvSource::Calculated);
    assert!(snap.delta < 0.6);
}

#[rstest]
#[case(0.0)]
#[case(-2.0)]
fn test_expired_contract_falls_back(calculator: GreeksCalculator, #[case] days: f64) {
    let mut req = request(OptionSide::Put, 21500.0, 50.0);
    req.days_to_expiry = days;
    let (snap, status) = calculator.calculate(&req);

    assert_matches!(status, CalcStatus::Error(CalcFailure::NonPositiveExpiry));
    assert_eq!(snap.iv_source, IvSource::ErrorFallback);
    assert_eq!(snap.delta, -0.5);
    assert_eq!(snap.implied_volatility, 0.0);
    assert_eq!(snap.gamma, 0.0);
}

#[rstest]
fn test_unattainable_price_falls_back(calculator: GreeksCalculator) {
    let req = request(OptionSide::Call, 21500.0, 25_000.0);
    let (snap, status) = calculator.calculate(&req);

    assert_matches!(status, CalcStatus::Error(CalcFailure::PriceOutOfBounds { .. }));
    assert_eq!(snap.delta, 0.5);
    assert_eq!(snap.iv_source, IvSource::ErrorFallback);
}

#[rstest]
fn test_stats_track_sources(calculator: GreeksCalculator) {
    let ok = request(OptionSide::Call, 21500.0, fair_price(OptionSide::Call, 21500.0, 0.15));
    let mut broker = ok;
    broker.broker_iv = Some(0.15);
    let mut expired = ok;
    expired.days_to_expiry = 0.0;

    calculator.calculate(&ok);
    calculator.calculate(&broker);
    calculator.calculate(&expired);
    calculator.calculate(&expired);

    let stats = calculator.stats();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.calculated, 1);
    assert_eq!(stats.broker, 1);
    assert_eq!(stats.errors, 2);
    assert_abs_diff_eq!(stats.error_rate, 0.5, epsilon = 1e-12);
}

fn capped_calculator(estimate_tolerance: f64) -> GreeksCalculator {
    init_test_env();
    GreeksCalculator::new(CalculatorConfig {
        solver: IvSolverParams {
            max_iterations: 1,
            price_tolerance: 1e-12,
            estimate_tolerance,
            ..IvSolverParams::default()
        },
        ..CalculatorConfig::default()
    })
}

#[test]
fn test_iteration_cap_tags_estimated() {
    let calculator = capped_calculator(10.0);
    let req = request(OptionSide::Call, 21700.0, fair_price(OptionSide::Call, 21700.0, 0.4));
    let (snap, status) = calculator.calculate(&req);

    assert!(status.is_ok());
    assert_eq!(snap.iv_source, IvSource::Estimated);
    assert!(snap.implied_volatility > 0.0);
    assert!(snap.satisfies_invariants());
    assert_eq!(calculator.stats().estimated, 1);
}

#[test]
fn test_iteration_cap_without_estimate_falls_back() {
    let calculator = capped_calculator(1e-12);
    let req = request(OptionSide::Put, 21300.0, fair_price(OptionSide::Put, 21300.0, 0.4));
    let (snap, status) = calculator.calculate(&req);

    assert_matches!(status, CalcStatus::Error(CalcFailure::NoConvergence { iterations: 1, .. }));
    assert_eq!(snap.iv_source, IvSource::ErrorFallback);
    assert_eq!(snap.delta, -0.5);
    assert_eq!(calculator.stats().errors, 1);
}

#[rstest]
fn test_deep_itm_near_expiry_is_estimated(calculator: GreeksCalculator) {
    let strike = market::NIFTY_SPOT * 0.9;
    let mut req = request(OptionSide::Call, strike, 0.0);
    req.days_to_expiry = 1.0;
    req.last_price = BlackScholes::price(
        OptionSide::Call,
        market::NIFTY_SPOT,
        strike,
        market::RATE,
        0.05,
        1.0 / DAYS_PER_YEAR,
    );
    let (snap, status) = calculator.calculate(&req);

    assert!(status.is_ok());
    assert_eq!(snap.iv_source, IvSource::Estimated);
    assert!(snap.delta > 0.99);
}
