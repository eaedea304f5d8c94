//! Error types for the signal engine

use crate::types::OptionSide;
use thiserror::Error;

/// Engine error types
#[derive(Debug, Error)]
pub enum EngineError {
    /// An update arrived before `set_universe`
    #[error("Universe not set: call set_universe before updating from the option chain")]
    UniverseNotSet,

    /// Universe parameters rejected
    #[error("Invalid universe: {0}")]
    InvalidUniverse(String),

    /// A single chain row is unusable
    #[error("Invalid quote {strike}{side}: {reason}")]
    InvalidQuote {
        /// Strike of the rejected row
        strike: f64,
        /// Side of the rejected row
        side: OptionSide,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration failed to load or validate
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration loaded but holds out-of-range values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Why a Greeks calculation fell back to defaults
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcFailure {
    /// Time to expiry is zero or negative
    #[error("non-positive time to expiry")]
    NonPositiveExpiry,

    /// Spot, strike or price unusable
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Price outside the no-arbitrage range for any volatility in the search bounds
    #[error("price {price:.4} outside attainable range [{lower:.4}, {upper:.4}]")]
    PriceOutOfBounds {
        /// Observed price
        price: f64,
        /// Model price at the lowest volatility bound
        lower: f64,
        /// Model price at the highest volatility bound
        upper: f64,
    },

    /// Solver did not reach tolerance
    #[error(
        "implied volatility did not converge after {iterations} iterations (residual {residual:.6})"
    )]
    NoConvergence {
        /// Iterations performed
        iterations: u32,
        /// Final absolute price residual
        residual: f64,
    },
}
