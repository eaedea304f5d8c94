//! Signal orchestrator
//!
//! Runs one update cycle per chain snapshot: calculate Greeks, analyze zones,
//! grade health, validate OI sync, derive the strategy signal, swap state and
//! fan the signal out to subscribers.
//!
//! A single writer runs cycles (guarded by `cycle_guard`). Readers only take
//! the state read lock long enough to clone an `Arc`.

use crate::calculator::{CalcRequest, CalculatorStats, GreeksCalculator};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::health::{GreeksHealthReport, HealthMonitor, HealthStatus, HealthSummary, SanityCheck};
use crate::oi_sync::{ChainOiSync, OiRecommendation, OiSyncResult, OiSyncStats, OiSyncValidator};
use crate::signal::{StrategySignal, TradeRecommendation, VolatilityState};
use crate::types::{
    ChainSource, ChainUpdate, ContractKey, GreeksMap, GreeksSnapshot, OiMap, OiRecord, OptionQuote,
    OptionSide, Universe,
};
use crate::zones::{AtmIntelligence, ChangeAnalyzer};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Signal subscriber callback
pub type SignalCallback = Arc<dyn Fn(&StrategySignal) + Send + Sync>;

/// Handle returned by [`GreeksSignalEngine::subscribe_to_signals`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(u64);

/// Engine counters
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    /// Cycles run (including short-circuited ones)
    pub cycles: u64,
    /// Signals published
    pub signals_generated: u64,
    /// Cycles where a chain-wide fake move blocked trading
    pub fake_moves_blocked: u64,
    /// Contracts flagged for theta exit
    pub theta_exits_triggered: u64,
    /// Updates rejected before a cycle ran
    pub skipped_updates: u64,
    /// Quotes dropped as invalid
    pub dropped_quotes: u64,
    /// Subscriber callbacks that panicked
    pub subscriber_failures: u64,
    /// Active subscribers
    pub subscribers: usize,
    /// Calculator counters
    pub calculator: CalculatorStats,
    /// OI-sync counters
    pub oi_sync: OiSyncStats,
    /// Health history summary
    pub health: HealthSummary,
}

/// Read-only view of the whole engine
#[derive(Debug, Clone, Serialize)]
pub struct DetailedStatus {
    /// Tracked universe
    pub universe: Option<Universe>,
    /// Contracts in the current cycle
    pub tracked_contracts: usize,
    /// Contracts in the previous cycle
    pub previous_contracts: usize,
    /// Current Greeks ordered by strike then side
    pub greeks: Vec<GreeksSnapshot>,
    /// Latest zone view
    pub atm: Option<AtmIntelligence>,
    /// Latest signal
    pub signal: StrategySignal,
    /// Latest health report
    pub health: Option<GreeksHealthReport>,
    /// Latest chain OI sync
    pub oi_sync: Option<ChainOiSync>,
    /// Counters
    pub metrics: EngineMetrics,
}

#[derive(Debug, Default)]
struct EngineState {
    universe: Option<Universe>,
    current_greeks: Arc<GreeksMap>,
    previous_greeks: Arc<GreeksMap>,
    current_oi: Arc<OiMap>,
    previous_oi: Arc<OiMap>,
    atm: Option<Arc<AtmIntelligence>>,
    signal: Option<Arc<StrategySignal>>,
    health: Option<Arc<GreeksHealthReport>>,
    oi_sync: Option<Arc<ChainOiSync>>,
}

#[derive(Debug, Default)]
struct EngineCounters {
    cycles: AtomicU64,
    signals_generated: AtomicU64,
    fake_moves_blocked: AtomicU64,
    theta_exits_triggered: AtomicU64,
    skipped_updates: AtomicU64,
    dropped_quotes: AtomicU64,
    subscriber_failures: AtomicU64,
}

/// Everything a cycle derives before it is swapped in
struct CycleOutput {
    greeks: GreeksMap,
    oi: OiMap,
    atm: AtmIntelligence,
    health: GreeksHealthReport,
    oi_sync: Option<ChainOiSync>,
    signal: StrategySignal,
}

/// Options Greeks and signal engine
pub struct GreeksSignalEngine {
    config: EngineConfig,
    calculator: GreeksCalculator,
    analyzer: ChangeAnalyzer,
    health: HealthMonitor,
    validator: OiSyncValidator,
    state: RwLock<EngineState>,
    cycle_guard: Mutex<()>,
    subscribers: RwLock<Vec<(SubscriptionId, SignalCallback)>>,
    next_subscription: AtomicU64,
    counters: EngineCounters,
}

impl std::fmt::Debug for GreeksSignalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GreeksSignalEngine")
            .field("universe", &self.state.read().universe)
            .field("subscribers", &self.subscribers.read().len())
            .finish_non_exhaustive()
    }
}

impl GreeksSignalEngine {
    /// Create an engine with no universe
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            calculator: GreeksCalculator::new(config.calculator.clone()),
            analyzer: ChangeAnalyzer::new(config.zones.clone()),
            health: HealthMonitor::new(config.health.clone()),
            validator: OiSyncValidator::new(config.oi_sync.clone()),
            config,
            state: RwLock::new(EngineState::default()),
            cycle_guard: Mutex::new(()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            counters: EngineCounters::default(),
        }
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Set the tracked underlying, ATM strike and days to expiry
    ///
    /// Switching to a different underlying drops the tracked chain so no
    /// cycle compares contracts across underlyings.
    pub fn set_universe(
        &self,
        underlying: &str,
        atm_strike: f64,
        days_to_expiry: f64,
    ) -> EngineResult<()> {
        if underlying.trim().is_empty() {
            return Err(EngineError::InvalidUniverse("underlying must not be empty".to_string()));
        }
        if !(atm_strike.is_finite() && atm_strike > 0.0) {
            return Err(EngineError::InvalidUniverse(format!(
                "ATM strike {atm_strike} must be positive"
            )));
        }
        if !(days_to_expiry.is_finite() && days_to_expiry >= 0.0) {
            return Err(EngineError::InvalidUniverse(format!(
                "days to expiry {days_to_expiry} must be non-negative"
            )));
        }

        let _cycle = self.cycle_guard.lock();
        let mut state = self.state.write();
        let switched = state
            .universe
            .as_ref()
            .is_some_and(|u| u.underlying != underlying);
        if switched {
            state.current_greeks = Arc::default();
            state.previous_greeks = Arc::default();
            state.current_oi = Arc::default();
            state.previous_oi = Arc::default();
            state.atm = None;
            state.oi_sync = None;
        }
        state.universe = Some(Universe {
            underlying: underlying.to_string(),
            atm_strike,
            days_to_expiry,
        });

        info!(underlying, atm_strike, days_to_expiry, switched, "Universe set");
        Ok(())
    }

    /// Currently tracked universe
    #[must_use]
    pub fn universe(&self) -> Option<Universe> {
        self.state.read().universe.clone()
    }

    /// Run one full update cycle and publish the resulting signal
    ///
    /// Subscribers run on this thread while the cycle guard is held, so a
    /// callback must not call back into this method.
    pub fn update_from_option_chain(
        &self,
        update: &ChainUpdate,
    ) -> EngineResult<Arc<StrategySignal>> {
        let _cycle = self.cycle_guard.lock();

        let (universe, previous_greeks, previous_oi) = {
            let state = self.state.read();
            (
                state.universe.clone(),
                Arc::clone(&state.current_greeks),
                Arc::clone(&state.current_oi),
            )
        };
        let Some(universe) = universe else {
            self.counters.skipped_updates.fetch_add(1, Ordering::Relaxed);
            warn!(quotes = update.quotes.len(), "Chain update skipped: universe not set");
            return Err(EngineError::UniverseNotSet);
        };

        let now = Utc::now();
        let cycle = self.counters.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let output = self.run_cycle(&universe, update, &previous_greeks, &previous_oi, cycle, now);
        let signal = Arc::new(output.signal);

        {
            let mut state = self.state.write();
            state.previous_greeks = previous_greeks;
            state.previous_oi = previous_oi;
            state.current_greeks = Arc::new(output.greeks);
            state.current_oi = Arc::new(output.oi);
            state.atm = Some(Arc::new(output.atm));
            state.health = Some(Arc::new(output.health));
            state.oi_sync = output.oi_sync.map(Arc::new);
            state.signal = Some(Arc::clone(&signal));
        }
        self.counters.signals_generated.fetch_add(1, Ordering::Relaxed);

        info!(
            underlying = %universe.underlying,
            cycle,
            bias = signal.direction_bias(),
            acceleration = signal.acceleration_score(),
            theta_pressure = signal.theta_pressure(),
            volatility = ?signal.volatility_state(),
            recommendation = ?signal.recommendation(),
            confidence = signal.confidence(),
            tradeable = signal.is_tradeable(),
            "Signal generated"
        );

        self.publish(&signal);
        Ok(signal)
    }

    fn run_cycle(
        &self,
        universe: &Universe,
        update: &ChainUpdate,
        previous_greeks: &GreeksMap,
        previous_oi: &OiMap,
        cycle: u64,
        now: DateTime<Utc>,
    ) -> CycleOutput {
        let spot = update
            .spot
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(universe.atm_strike);

        let mut greeks = GreeksMap::new();
        let mut oi = OiMap::default();
        for quote in &update.quotes {
            if let Err(e) = validate_quote(quote) {
                self.counters.dropped_quotes.fetch_add(1, Ordering::Relaxed);
                warn!(underlying = %universe.underlying, error = %e, "Quote dropped");
                continue;
            }

            let key = quote.key();
            let timestamp = quote.timestamp.unwrap_or(now);
            let request = CalcRequest {
                strike: quote.strike,
                side: quote.side,
                spot,
                days_to_expiry: universe.days_to_expiry,
                last_price: quote.reference_price(),
                risk_free_rate: self.config.risk_free_rate,
                broker_greeks: update.broker_greeks.as_ref().and_then(|m| m.get(&key).copied()),
                broker_iv: update.broker_iv.as_ref().and_then(|m| m.get(&key).copied()),
                timestamp,
            };

            let (mut snapshot, _status) = self.calculator.calculate(&request);
            if let Some(previous) = previous_greeks.get(&key) {
                snapshot.link_previous(previous);
            }
            greeks.insert(key, snapshot);
            oi.insert(
                key,
                OiRecord {
                    oi: quote.oi,
                    volume: quote.volume,
                    timestamp,
                },
            );
        }

        let atm = self.analyzer.analyze_atm_zone(universe.atm_strike, &greeks);
        let health = self.health.evaluate(&universe.underlying, &greeks, now);
        let volatility =
            VolatilityState::classify(health.average_iv, health.iv_change, &self.config.signal);

        let base = StrategySignal::builder()
            .volatility_state(volatility)
            .momentum(atm.momentum.tendency)
            .health_status(health.status)
            .cycle(cycle)
            .generated_at(now);

        if !health.can_trade {
            let signal = base
                .data_healthy(false)
                .tradeable(false)
                .recommendation(TradeRecommendation::Avoid)
                .confidence(0.0)
                .build();
            return CycleOutput {
                greeks,
                oi,
                atm,
                health,
                oi_sync: None,
                signal,
            };
        }

        let cfg = &self.config.signal;
        let bias = (atm.atm_call_delta + atm.atm_put_delta.abs()) / 2.0;
        let acceleration = atm.gamma_peak_value / cfg.gamma_norm;
        let theta_pressure = atm.theta_kill_value / cfg.theta_norm;

        let mut confidence = 0.5 + (bias - 0.5).abs();
        if health.status == HealthStatus::Degraded {
            confidence *= 0.7;
        }

        let chain = self.validator.validate_chain(&greeks, &oi, previous_oi);
        self.counters
            .theta_exits_triggered
            .fetch_add(chain.theta_danger as u64, Ordering::Relaxed);

        let mut tradeable = true;
        let mut fake_move = false;
        match chain.recommendation {
            OiRecommendation::Avoid => {
                tradeable = false;
                fake_move = true;
                confidence *= 0.3;
                self.counters.fake_moves_blocked.fetch_add(1, Ordering::Relaxed);
            }
            OiRecommendation::Proceed => confidence *= 1.2,
            OiRecommendation::Caution => confidence *= 0.7,
            OiRecommendation::Neutral => {}
        }

        let mut recommendation = if bias > cfg.bullish_threshold {
            TradeRecommendation::BuyCall
        } else if bias < cfg.bearish_threshold {
            TradeRecommendation::BuyPut
        } else {
            TradeRecommendation::Neutral
        };
        if theta_pressure >= cfg.theta_override {
            confidence *= 0.5;
            recommendation = TradeRecommendation::Neutral;
        }
        if !tradeable {
            recommendation = TradeRecommendation::Avoid;
        }

        let signal = base
            .direction_bias(bias)
            .acceleration_score(acceleration)
            .theta_pressure(theta_pressure)
            .data_healthy(true)
            .tradeable(tradeable)
            .fake_move_detected(fake_move)
            .recommendation(recommendation)
            .confidence(confidence)
            .build();

        CycleOutput {
            greeks,
            oi,
            atm,
            health,
            oi_sync: Some(chain),
            signal,
        }
    }

    fn publish(&self, signal: &StrategySignal) {
        let subscribers: Vec<(SubscriptionId, SignalCallback)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();

        for (id, callback) in subscribers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(signal))) {
                self.counters.subscriber_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    subscription = id.0,
                    reason = %panic_message(panic.as_ref()),
                    "Signal subscriber panicked"
                );
            }
        }
    }

    /// Register a callback invoked with every published signal
    pub fn subscribe_to_signals<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StrategySignal) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, Arc::new(callback)));
        debug!(subscription = id.0, "Signal subscriber added");
        id
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe_from_signals(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        before != subscribers.len()
    }

    /// Latest signal, or the neutral signal before the first cycle
    #[must_use]
    pub fn current_signal(&self) -> Arc<StrategySignal> {
        self.state
            .read()
            .signal
            .clone()
            .unwrap_or_else(|| Arc::new(StrategySignal::neutral()))
    }

    /// 0 = bearish, 1 = bullish
    #[must_use]
    pub fn direction_bias(&self) -> f64 {
        self.current_signal().direction_bias()
    }

    /// Gamma-driven acceleration, 0..1
    #[must_use]
    pub fn acceleration_score(&self) -> f64 {
        self.current_signal().acceleration_score()
    }

    /// Time-decay pressure, 0..1
    #[must_use]
    pub fn theta_pressure(&self) -> f64 {
        self.current_signal().theta_pressure()
    }

    /// Volatility regime
    #[must_use]
    pub fn volatility_state(&self) -> VolatilityState {
        self.current_signal().volatility_state()
    }

    /// Whether the latest signal may be acted on
    #[must_use]
    pub fn is_tradeable(&self) -> bool {
        self.current_signal().is_tradeable()
    }

    /// Latest recommendation
    #[must_use]
    pub fn trade_recommendation(&self) -> TradeRecommendation {
        self.current_signal().recommendation()
    }

    /// Latest confidence
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.current_signal().confidence()
    }

    /// Latest zone view
    #[must_use]
    pub fn atm_intelligence(&self) -> Option<AtmIntelligence> {
        self.state.read().atm.as_deref().cloned()
    }

    /// Latest health report
    #[must_use]
    pub fn health_report(&self) -> Option<GreeksHealthReport> {
        self.state.read().health.as_deref().cloned()
    }

    /// Up to `n` most recent health reports, oldest first
    #[must_use]
    pub fn health_history(&self, n: usize) -> Vec<GreeksHealthReport> {
        self.health.history(n)
    }

    /// Summary over the retained health history
    #[must_use]
    pub fn health_summary(&self) -> HealthSummary {
        self.health.health_summary()
    }

    /// Latest chain OI sync
    #[must_use]
    pub fn chain_oi_sync(&self) -> Option<ChainOiSync> {
        self.state.read().oi_sync.as_deref().cloned()
    }

    /// Current Greeks for one contract
    #[must_use]
    pub fn greeks_for(&self, strike: f64, side: OptionSide) -> Option<GreeksSnapshot> {
        let greeks = Arc::clone(&self.state.read().current_greeks);
        greeks.get(&ContractKey::new(strike, side)).cloned()
    }

    /// Latest OI-sync result for one contract
    #[must_use]
    pub fn oi_sync_for(&self, strike: f64, side: OptionSide) -> Option<OiSyncResult> {
        let chain = self.state.read().oi_sync.clone()?;
        chain.result_for(ContractKey::new(strike, side)).cloned()
    }

    /// Sanity check of one contract's current Greeks
    #[must_use]
    pub fn sanity_check(&self, strike: f64, side: OptionSide) -> Option<SanityCheck> {
        let snapshot = self.greeks_for(strike, side)?;
        Some(self.health.check_greek_sanity(&snapshot, Utc::now()))
    }

    /// Counter snapshot
    #[must_use]
    pub fn metrics(&self) -> EngineMetrics {
        let c = &self.counters;
        EngineMetrics {
            cycles: c.cycles.load(Ordering::Relaxed),
            signals_generated: c.signals_generated.load(Ordering::Relaxed),
            fake_moves_blocked: c.fake_moves_blocked.load(Ordering::Relaxed),
            theta_exits_triggered: c.theta_exits_triggered.load(Ordering::Relaxed),
            skipped_updates: c.skipped_updates.load(Ordering::Relaxed),
            dropped_quotes: c.dropped_quotes.load(Ordering::Relaxed),
            subscriber_failures: c.subscriber_failures.load(Ordering::Relaxed),
            subscribers: self.subscribers.read().len(),
            calculator: self.calculator.stats(),
            oi_sync: self.validator.stats(),
            health: self.health.health_summary(),
        }
    }

    /// Read-only view of everything the engine tracks
    #[must_use]
    pub fn detailed_status(&self) -> DetailedStatus {
        let (universe, current, previous, atm, signal, health, oi_sync) = {
            let state = self.state.read();
            (
                state.universe.clone(),
                Arc::clone(&state.current_greeks),
                Arc::clone(&state.previous_greeks),
                state.atm.clone(),
                state.signal.clone(),
                state.health.clone(),
                state.oi_sync.clone(),
            )
        };

        DetailedStatus {
            universe,
            tracked_contracts: current.len(),
            previous_contracts: previous.len(),
            greeks: current.values().cloned().collect(),
            atm: atm.as_deref().cloned(),
            signal: signal.as_deref().cloned().unwrap_or_default(),
            health: health.as_deref().cloned(),
            oi_sync: oi_sync.as_deref().cloned(),
            metrics: self.metrics(),
        }
    }

    /// Poll `source` every `interval` and run a cycle per update until shutdown
    pub fn spawn_refresh_loop(
        self: Arc<Self>,
        source: Arc<dyn ChainSource>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = interval.as_millis() as u64, "Refresh loop started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match source.next_update() {
                            Some(update) => {
                                if let Err(e) = self.update_from_option_chain(&update) {
                                    debug!(error = %e, "Refresh cycle skipped");
                                }
                            }
                            None => debug!("No chain update available"),
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Refresh loop received shutdown signal");
                        break;
                    }
                }
            }
        })
    }
}

fn validate_quote(quote: &OptionQuote) -> EngineResult<()> {
    let reason = if !(quote.strike.is_finite() && quote.strike > 0.0) {
        Some("strike must be positive")
    } else if !(quote.ltp.is_finite() && quote.ltp >= 0.0) {
        Some("last price must be finite and non-negative")
    } else if !(quote.bid.is_finite()
        && quote.bid >= 0.0
        && quote.ask.is_finite()
        && quote.ask >= 0.0)
    {
        Some("bid/ask must be finite and non-negative")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(EngineError::InvalidQuote {
            strike: quote.strike,
            side: quote.side,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
