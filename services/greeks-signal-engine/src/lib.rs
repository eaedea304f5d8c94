//! ShrivenQuant Greeks Signal Engine
//! Options Greeks and signal intelligence for Indian index options
//!
//! Features:
//! - Black-Scholes Greeks with broker-first IV and a safeguarded IV solver
//! - Cycle-over-cycle Greek velocities and ATM zone analysis
//! - Data health grading with trend history
//! - Delta/OI synchronization to separate real moves from fake ones
//! - A single clamped `StrategySignal` published to subscribers each cycle

pub mod black_scholes;
pub mod calculator;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod oi_sync;
pub mod signal;
pub mod types;
pub mod zones;

pub use black_scholes::{BlackScholes, BsGreeks, IvSolution, IvSolverParams};
pub use calculator::{CalcRequest, CalcStatus, CalculatorStats, GreeksCalculator};
pub use config::EngineConfig;
pub use engine::{DetailedStatus, EngineMetrics, GreeksSignalEngine, SignalCallback, SubscriptionId};
pub use error::{CalcFailure, EngineError, EngineResult};
pub use health::{GreeksHealthReport, HealthMonitor, HealthStatus, HealthSummary, HealthTrend};
pub use oi_sync::{
    ChainOiSync, Direction, OiRecommendation, OiSyncInput, OiSyncResult, OiSyncValidator,
};
pub use signal::{StrategySignal, TradeRecommendation, VolatilityState};
pub use types::{
    BrokerGreeks, ChainSource, ChainUpdate, ContractKey, GreeksMap, GreeksSnapshot, IvSource, OiMap,
    OiRecord, OptionQuote, OptionSide, Universe,
};
pub use zones::{AtmIntelligence, ChangeAnalyzer, DeltaBattle, GreekVelocity, MomentumTendency};
