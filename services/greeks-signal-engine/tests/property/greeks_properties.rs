//! Property-based tests for Greeks and OI-sync invariants
//!
//! - Delta stays within its side's bounds and gamma is never negative
//! - Implied volatility recovers the pricing volatility
//! - Call delta is monotone in spot
//! - The gamma peak sits next to the forward-adjusted ATM strike
//! - Chain reduction ignores contract order

use greeks_signal_engine::config::OiSyncConfig;
use greeks_signal_engine::{BlackScholes, IvSolverParams, OiSyncInput, OiSyncValidator, OptionSide};
use proptest::prelude::*;

const RATE: f64 = 0.065;

#[cfg(feature = "expensive-tests")]
const CASES: u32 = 2_000;
#[cfg(not(feature = "expensive-tests"))]
const CASES: u32 = 256;

/// Option side
fn arb_side() -> impl Strategy<Value = OptionSide> {
    prop_oneof![Just(OptionSide::Call), Just(OptionSide::Put)]
}

/// Index level in the range NIFTY has traded
fn arb_spot() -> impl Strategy<Value = f64> {
    15_000.0..25_000.0f64
}

/// Time to expiry in years, at least a few hours
fn arb_time() -> impl Strategy<Value = f64> {
    (0.1..90.0f64).prop_map(|days| days / 365.0)
}

/// Per-contract validation input
fn arb_input() -> impl Strategy<Value = OiSyncInput> {
    (
        arb_side(),
        0.05..0.95f64,
        -0.1..0.1f64,
        1_000u64..200_000,
        -20_000i64..20_000,
        -0.0005..0.0005f64,
        -0.2..0.2f64,
    )
        .prop_map(|(side, prev_delta, delta_step, prev_oi, oi_step, gamma_change, theta_change)| {
            let sign = if side == OptionSide::Call { 1.0 } else { -1.0 };
            OiSyncInput {
                strike: 21_500.0,
                side,
                delta: sign * (prev_delta + delta_step),
                prev_delta: sign * prev_delta,
                oi: prev_oi.saturating_add_signed(oi_step),
                prev_oi,
                gamma_change,
                theta_change,
            }
        })
}

mod greeks_bounds {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(CASES))]

        #[test]
        fn delta_bounded_and_gamma_non_negative(
            side in arb_side(),
            spot in arb_spot(),
            moneyness in -0.3..0.3f64,
            volatility in 0.05..2.0f64,
            time in arb_time(),
        ) {
            let strike = spot * (1.0 + moneyness);
            let greeks = BlackScholes::calculate_greeks(side, spot, strike, RATE, volatility, time);

            match side {
                OptionSide::Call => prop_assert!((0.0..=1.0).contains(&greeks.delta)),
                OptionSide::Put => prop_assert!((-1.0..=0.0).contains(&greeks.delta)),
            }
            prop_assert!(greeks.gamma >= 0.0);
            prop_assert!(greeks.vega >= 0.0);
        }

        #[test]
        fn call_delta_monotone_in_spot(
            spot in arb_spot(),
            bump in 1.0..500.0f64,
            volatility in 0.05..1.0f64,
            time in arb_time(),
        ) {
            let strike = 21_500.0;
            let call = OptionSide::Call;
            let delta_at = |s: f64| {
                BlackScholes::calculate_greeks(call, s, strike, RATE, volatility, time).delta
            };
            prop_assert!(delta_at(spot) <= delta_at(spot + bump) + 1e-12);
        }

        #[test]
        fn gamma_peak_next_to_forward_atm(
            spot in arb_spot(),
            volatility in 0.08..0.3f64,
            days in 1.0..10.0f64,
        ) {
            let step = 100.0;
            let time = days / 365.0;
            let centre = (spot / step).round() * step;
            let ladder: Vec<f64> = (-10..=10).map(|i| centre + f64::from(i) * step).collect();

            let peak = ladder
                .iter()
                .copied()
                .map(|k| {
                    let call = OptionSide::Call;
                    (k, BlackScholes::calculate_greeks(call, spot, k, RATE, volatility, time).gamma)
                })
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(k, _)| k)
                .unwrap();

            // Gamma in strike peaks where d1 = 0
            let continuous_peak = spot * ((RATE + volatility * volatility / 2.0) * time).exp();
            prop_assert!((peak - continuous_peak).abs() <= step);
        }
    }
}

mod iv_solver {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(CASES))]

        #[test]
        fn implied_volatility_recovers_pricing_vol(
            side in arb_side(),
            spot in arb_spot(),
            moneyness in -0.02..0.02f64,
            volatility in 0.1..0.6f64,
            days in 7.0..60.0f64,
        ) {
            let strike = spot * (1.0 + moneyness);
            let time = days / 365.0;
            let price = BlackScholes::price(side, spot, strike, RATE, volatility, time);

            let solution = BlackScholes::implied_volatility(
                side, spot, strike, RATE, time, price, &IvSolverParams::default(),
            ).unwrap();

            prop_assert!((solution.volatility - volatility).abs() < 1e-3);
        }
    }
}

mod chain_reduction {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(CASES))]

        #[test]
        fn aggregate_ignores_order(
            (inputs, shuffled) in prop::collection::vec(arb_input(), 0..40)
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
        ) {
            let validator = OiSyncValidator::new(OiSyncConfig::default());
            let reduce = |batch: &[OiSyncInput]| {
                validator.aggregate(batch.iter().map(|i| validator.validate(i)).collect())
            };
            let original = reduce(&inputs);
            let reordered = reduce(&shuffled);

            prop_assert_eq!(original.recommendation, reordered.recommendation);
            prop_assert_eq!(original.validated, reordered.validated);
            prop_assert_eq!(original.fake_moves, reordered.fake_moves);
            prop_assert_eq!(original.smart_money, reordered.smart_money);
            prop_assert_eq!(original.theta_danger, reordered.theta_danger);
            prop_assert_eq!(
                original.average_quality.to_bits(),
                reordered.average_quality.to_bits()
            );
        }

        #[test]
        fn quality_stays_in_unit_range(input in arb_input()) {
            let validator = OiSyncValidator::new(OiSyncConfig::default());
            let result = validator.validate(&input);
            prop_assert!((0.0..=1.0).contains(&result.quality_score));
        }
    }
}
