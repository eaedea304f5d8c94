//! Greeks Signal Engine Service
//!
//! Runs the engine against a synthetic random-walk option chain for paper
//! runs, logging every published signal until Ctrl-C.

use anyhow::{Context, Result};
use chrono::Utc;
use greeks_signal_engine::black_scholes::{BlackScholes, DAYS_PER_YEAR};
use greeks_signal_engine::{
    ChainSource, ChainUpdate, EngineConfig, GreeksSignalEngine, OptionQuote, OptionSide,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Constants
const SERVICE_NAME: &str = "greeks-signal-engine";
const CONFIG_PATH_VAR: &str = "GREEKS_ENGINE_CONFIG";
const UNDERLYING: &str = "NIFTY";
const ATM_STRIKE: f64 = 21500.0;
const STRIKE_STEP: f64 = 50.0;
const STRIKES_EACH_SIDE: i32 = 10;
const DAYS_TO_EXPIRY: f64 = 7.0;
const STARTING_IV: f64 = 0.14;
const TICK_SIZE: f64 = 0.05;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting Greeks Signal Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    let interval = config.refresh_interval();
    let rate = config.risk_free_rate;

    let engine = Arc::new(GreeksSignalEngine::new(config));
    engine
        .set_universe(UNDERLYING, ATM_STRIKE, DAYS_TO_EXPIRY)
        .context("Failed to set universe")?;

    engine.subscribe_to_signals(|signal| {
        info!(
            cycle = signal.cycle(),
            recommendation = ?signal.recommendation(),
            bias = signal.direction_bias(),
            confidence = signal.confidence(),
            volatility = ?signal.volatility_state(),
            tradeable = signal.is_tradeable(),
            "Signal published"
        );
    });

    let source = Arc::new(SyntheticChain::new(ATM_STRIKE, STARTING_IV, DAYS_TO_EXPIRY, rate)?);

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let refresh = Arc::clone(&engine).spawn_refresh_loop(source, interval, shutdown_tx.subscribe());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Received Ctrl-C, shutting down");

    if shutdown_tx.send(()).is_err() {
        warn!("Refresh loop already stopped");
    }
    if let Err(e) = refresh.await {
        error!("Refresh loop terminated abnormally: {}", e);
    }

    let metrics =
        serde_json::to_string_pretty(&engine.metrics()).context("Failed to serialize metrics")?;
    println!("{metrics}");

    info!("Greeks Signal Engine shut down successfully");
    Ok(())
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", SERVICE_NAME.replace('-', "_")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();
}

/// Load configuration from file when `GREEKS_ENGINE_CONFIG` is set, otherwise from environment
fn load_config() -> Result<EngineConfig> {
    match std::env::var(CONFIG_PATH_VAR) {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            EngineConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from {path}"))
        }
        Err(_) => EngineConfig::from_env().context("Failed to load config from environment"),
    }
}

struct SyntheticState {
    spot: f64,
    iv: f64,
    open_interest: Vec<u64>,
    volume: Vec<u64>,
    rng: StdRng,
}

/// Random-walk chain: lognormal spot, drifting IV with a mild smile, noisy OI
struct SyntheticChain {
    strikes: Vec<(f64, OptionSide)>,
    days_to_expiry: f64,
    rate: f64,
    spot_step: Normal<f64>,
    iv_step: Normal<f64>,
    oi_step: Normal<f64>,
    state: Mutex<SyntheticState>,
}

impl SyntheticChain {
    fn new(atm: f64, iv: f64, days_to_expiry: f64, rate: f64) -> Result<Self> {
        let strikes: Vec<(f64, OptionSide)> = (-STRIKES_EACH_SIDE..=STRIKES_EACH_SIDE)
            .flat_map(|i| {
                let strike = atm + f64::from(i) * STRIKE_STEP;
                [(strike, OptionSide::Call), (strike, OptionSide::Put)]
            })
            .collect();

        let mut rng = StdRng::from_entropy();
        let open_interest = strikes
            .iter()
            .map(|(strike, _)| {
                let distance = ((strike - atm) / STRIKE_STEP).abs();
                (2_000_000.0 / (1.0 + distance)) as u64 + rng.gen_range(0..50_000)
            })
            .collect();
        let volume = vec![0; strikes.len()];

        Ok(Self {
            strikes,
            days_to_expiry,
            rate,
            spot_step: Normal::new(0.0, 0.0006).context("Invalid spot distribution")?,
            iv_step: Normal::new(0.0, 0.002).context("Invalid IV distribution")?,
            oi_step: Normal::new(0.0, 0.01).context("Invalid OI distribution")?,
            state: Mutex::new(SyntheticState {
                spot: atm,
                iv,
                open_interest,
                volume,
                rng,
            }),
        })
    }
}

impl ChainSource for SyntheticChain {
    fn next_update(&self) -> Option<ChainUpdate> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.spot *= self.spot_step.sample(&mut state.rng).exp();
        state.iv = (state.iv + self.iv_step.sample(&mut state.rng)).clamp(0.08, 0.40);

        let time = self.days_to_expiry / DAYS_PER_YEAR;
        let now = Utc::now();
        let mut quotes = Vec::with_capacity(self.strikes.len());

        for (i, &(strike, side)) in self.strikes.iter().enumerate() {
            let moneyness = (strike / state.spot).ln();
            let iv = state.iv * (1.0 + 2.0 * moneyness * moneyness);
            let fair = BlackScholes::price(side, state.spot, strike, self.rate, iv, time);
            let ltp = ((fair / TICK_SIZE).round() * TICK_SIZE).max(TICK_SIZE);

            let shock = self.oi_step.sample(&mut state.rng);
            state.open_interest[i] =
                (state.open_interest[i] as f64 * (1.0 + shock)).max(0.0) as u64;
            state.volume[i] += state.rng.gen_range(0..5_000);

            quotes.push(OptionQuote {
                strike,
                side,
                ltp,
                bid: (ltp - TICK_SIZE).max(0.0),
                ask: ltp + TICK_SIZE,
                oi: state.open_interest[i],
                volume: state.volume[i],
                timestamp: Some(now),
            });
        }

        Some(ChainUpdate {
            quotes,
            spot: Some(state.spot),
            ..ChainUpdate::default()
        })
    }
}
