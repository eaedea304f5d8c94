//! Shared fixtures for greeks-signal-engine tests
#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use greeks_signal_engine::black_scholes::{BlackScholes, DAYS_PER_YEAR};
use greeks_signal_engine::{
    BrokerGreeks, ChainUpdate, ContractKey, EngineConfig, GreeksMap, GreeksSnapshot, IvSource,
    OptionQuote, OptionSide,
};
use rustc_hash::FxHashMap;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging for tests
pub fn init_test_env() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("greeks_signal_engine=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Market constants
pub mod market {
    pub const NIFTY_SPOT: f64 = 21500.0;
    pub const STRIKE_STEP: f64 = 50.0;
    pub const RATE: f64 = 0.065;
    pub const IV: f64 = 0.15;
    pub const DAYS: f64 = 7.0;
}

/// Default engine config
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
}

/// Strikes centered on `atm`
pub fn strike_ladder(atm: f64, each_side: i32) -> Vec<f64> {
    (-each_side..=each_side)
        .map(|i| atm + f64::from(i) * market::STRIKE_STEP)
        .collect()
}

/// Bare quote
pub fn quote(strike: f64, side: OptionSide, ltp: f64, oi: u64) -> OptionQuote {
    OptionQuote {
        strike,
        side,
        ltp,
        bid: (ltp - 0.05).max(0.0),
        ask: ltp + 0.05,
        oi,
        volume: 1_000,
        timestamp: None,
    }
}

/// Standard NIFTY chain around spot at the default volatility and expiry
pub fn nifty_chain(each_side: i32) -> ChainUpdate {
    priced_chain(
        market::NIFTY_SPOT,
        &strike_ladder(market::NIFTY_SPOT, each_side),
        market::IV,
        market::DAYS,
    )
}

/// Chain priced with Black-Scholes at one volatility, both sides per strike
pub fn priced_chain(spot: f64, strikes: &[f64], vol: f64, days: f64) -> ChainUpdate {
    let time = days / DAYS_PER_YEAR;
    let quotes = strikes
        .iter()
        .flat_map(|&strike| [(strike, OptionSide::Call), (strike, OptionSide::Put)])
        .map(|(strike, side)| {
            let ltp = BlackScholes::price(side, spot, strike, market::RATE, vol, time);
            quote(strike, side, ltp, 100_000)
        })
        .collect();

    ChainUpdate {
        quotes,
        spot: Some(spot),
        ..ChainUpdate::default()
    }
}

/// One contract carried on broker Greeks
#[derive(Debug, Clone, Copy)]
pub struct BrokerRow {
    pub strike: f64,
    pub side: OptionSide,
    pub greeks: BrokerGreeks,
    pub oi: u64,
}

impl BrokerRow {
    pub fn new(strike: f64, side: OptionSide, delta: f64, theta: f64, oi: u64) -> Self {
        Self {
            strike,
            side,
            greeks: BrokerGreeks {
                delta,
                gamma: 0.0008,
                theta,
                vega: 9.0,
            },
            oi,
        }
    }
}

/// Chain whose Greeks come straight from the broker, all at one IV
pub fn broker_chain(rows: &[BrokerRow], iv: f64) -> ChainUpdate {
    let mut greeks = FxHashMap::default();
    let mut ivs = FxHashMap::default();
    let quotes = rows
        .iter()
        .map(|row| {
            let key = ContractKey::new(row.strike, row.side);
            greeks.insert(key, row.greeks);
            ivs.insert(key, iv);
            quote(row.strike, row.side, 100.0, row.oi)
        })
        .collect();

    ChainUpdate {
        quotes,
        broker_greeks: Some(greeks),
        broker_iv: Some(ivs),
        spot: Some(market::NIFTY_SPOT),
    }
}

/// Four-contract ATM chain (two strikes, both sides) from call/put deltas
pub fn atm_broker_chain(call_delta: f64, put_delta: f64, theta: f64, oi: u64) -> ChainUpdate {
    let atm = market::NIFTY_SPOT;
    let upper = atm + market::STRIKE_STEP;
    broker_chain(
        &[
            BrokerRow::new(atm, OptionSide::Call, call_delta, theta, oi),
            BrokerRow::new(atm, OptionSide::Put, put_delta, theta, oi),
            BrokerRow::new(upper, OptionSide::Call, call_delta - 0.05, theta, oi),
            BrokerRow::new(upper, OptionSide::Put, put_delta - 0.05, theta, oi),
        ],
        market::IV,
    )
}

/// Stored snapshot for health and zone tests
pub fn snapshot(
    strike: f64,
    side: OptionSide,
    delta: f64,
    iv: f64,
    timestamp: DateTime<Utc>,
) -> GreeksSnapshot {
    GreeksSnapshot {
        strike,
        side,
        delta,
        gamma: 0.0007,
        theta: -8.0,
        vega: 10.0,
        prev_delta: None,
        prev_gamma: None,
        prev_theta: None,
        prev_vega: None,
        implied_volatility: iv,
        iv_source: if iv > 0.0 { IvSource::Calculated } else { IvSource::ErrorFallback },
        last_price: 100.0,
        timestamp,
    }
}

/// Map of `count` call snapshots, `stale` of which are `stale_secs` old
pub fn aged_map(count: usize, stale: usize, stale_secs: i64, now: DateTime<Utc>) -> GreeksMap {
    (0..count)
        .map(|i| {
            let strike = market::NIFTY_SPOT + i as f64 * market::STRIKE_STEP;
            let ts = if i < stale { now - Duration::seconds(stale_secs) } else { now };
            let snap = snapshot(strike, OptionSide::Call, 0.5, market::IV, ts);
            (snap.key(), snap)
        })
        .collect()
}
