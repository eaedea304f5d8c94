//! Black-Scholes pricing, analytic Greeks and implied volatility

use crate::error::CalcFailure;
use crate::types::OptionSide;
use serde::{Deserialize, Serialize};

const SQRT_2PI: f64 = 2.5066282746310007;

/// Calendar days per year for time-to-expiry and daily theta
pub const DAYS_PER_YEAR: f64 = 365.0;

/// First-order Greeks for one contract
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BsGreeks {
    /// Rate of change of option price with respect to underlying price
    pub delta: f64,
    /// Rate of change of delta with respect to underlying price
    pub gamma: f64,
    /// Time decay per calendar day
    pub theta: f64,
    /// Price change per 1 vol point
    pub vega: f64,
}

/// Bounds and tolerances for the implied volatility search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvSolverParams {
    /// Lowest volatility searched
    pub min_volatility: f64,
    /// Highest volatility searched
    pub max_volatility: f64,
    /// Convergence tolerance as a fraction of the target price
    pub price_tolerance: f64,
    /// Residual (fraction of price) still accepted as an estimate at the iteration cap
    pub estimate_tolerance: f64,
    /// Iteration cap
    pub max_iterations: u32,
}

impl Default for IvSolverParams {
    fn default() -> Self {
        Self {
            min_volatility: 0.01,
            max_volatility: 3.0,
            price_tolerance: 1e-5,
            estimate_tolerance: 1e-2,
            max_iterations: 100,
        }
    }
}

/// Outcome of a successful implied volatility search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IvSolution {
    /// Implied volatility as a fraction
    pub volatility: f64,
    /// Iterations used
    pub iterations: u32,
    /// Absolute price residual at the returned volatility
    pub residual: f64,
    /// False when the iteration cap was hit with an acceptable residual, or
    /// when the price does not pin volatility down
    pub converged: bool,
}

/// Black-Scholes option pricing model implementation
#[derive(Debug)]
pub struct BlackScholes;

impl BlackScholes {
    /// Standard normal cumulative distribution function
    #[must_use]
    pub fn norm_cdf(x: f64) -> f64 {
        0.5 * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
    }

    /// Standard normal probability density function
    #[must_use]
    pub fn norm_pdf(x: f64) -> f64 {
        (-0.5 * x * x).exp() / SQRT_2PI
    }

    /// Calculate d1 parameter
    #[must_use]
    pub fn d1(s: f64, k: f64, r: f64, sigma: f64, t: f64) -> f64 {
        ((s / k).ln() + (r + 0.5 * sigma * sigma) * t) / (sigma * t.sqrt())
    }

    /// Calculate d2 parameter
    #[must_use]
    pub fn d2(s: f64, k: f64, r: f64, sigma: f64, t: f64) -> f64 {
        Self::d1(s, k, r, sigma, t) - sigma * t.sqrt()
    }

    /// Black-Scholes option price; intrinsic value at or after expiry
    #[must_use]
    pub fn price(
        side: OptionSide,
        spot: f64,
        strike: f64,
        rate: f64,
        volatility: f64,
        time: f64,
    ) -> f64 {
        if time <= 0.0 {
            return Self::intrinsic(side, spot, strike);
        }

        let d1 = Self::d1(spot, strike, rate, volatility, time);
        let d2 = d1 - volatility * time.sqrt();
        let discount = (-rate * time).exp();

        match side {
            OptionSide::Call => spot * Self::norm_cdf(d1) - strike * discount * Self::norm_cdf(d2),
            OptionSide::Put => strike * discount * Self::norm_cdf(-d2) - spot * Self::norm_cdf(-d1),
        }
    }

    /// Intrinsic value
    #[must_use]
    pub fn intrinsic(side: OptionSide, spot: f64, strike: f64) -> f64 {
        match side {
            OptionSide::Call => (spot - strike).max(0.0),
            OptionSide::Put => (strike - spot).max(0.0),
        }
    }

    /// Raw vega (price change per 1.0 change in volatility), the solver's derivative
    #[must_use]
    pub fn raw_vega(spot: f64, strike: f64, rate: f64, volatility: f64, time: f64) -> f64 {
        if time <= 0.0 {
            return 0.0;
        }
        let d1 = Self::d1(spot, strike, rate, volatility, time);
        spot * Self::norm_pdf(d1) * time.sqrt()
    }

    /// First-order Greeks; all zero at or after expiry
    #[must_use]
    pub fn calculate_greeks(
        side: OptionSide,
        spot: f64,
        strike: f64,
        rate: f64,
        volatility: f64,
        time: f64,
    ) -> BsGreeks {
        if time <= 0.0 || volatility <= 0.0 {
            return BsGreeks::default();
        }

        let sqrt_t = time.sqrt();
        let d1 = Self::d1(spot, strike, rate, volatility, time);
        let d2 = d1 - volatility * sqrt_t;
        let npd1 = Self::norm_pdf(d1);
        let discount = (-rate * time).exp();
        let decay = -spot * npd1 * volatility / (2.0 * sqrt_t);

        let delta = match side {
            OptionSide::Call => Self::norm_cdf(d1),
            OptionSide::Put => Self::norm_cdf(d1) - 1.0,
        };

        let theta = match side {
            OptionSide::Call => decay - rate * strike * discount * Self::norm_cdf(d2),
            OptionSide::Put => decay + rate * strike * discount * Self::norm_cdf(-d2),
        } / DAYS_PER_YEAR;

        BsGreeks {
            delta,
            gamma: npd1 / (spot * volatility * sqrt_t),
            theta,
            vega: spot * npd1 * sqrt_t / 100.0, // Per 1% change
        }
    }

    /// Implied volatility by safeguarded Newton-Raphson
    ///
    /// Newton steps use raw vega as the derivative. The search keeps a
    /// bracket around the root and bisects whenever vega is negligible or the
    /// Newton step would leave the bracket, so the iteration can neither
    /// diverge nor escape `[min_volatility, max_volatility]`.
    ///
    /// When the price at `min_volatility` already matches within tolerance
    /// (time value lost in the tolerance, e.g. deep ITM near expiry), any
    /// volatility up to the returned one prices the contract, so the solution
    /// is reported with `converged: false`.
    pub fn implied_volatility(
        side: OptionSide,
        spot: f64,
        strike: f64,
        rate: f64,
        time: f64,
        market_price: f64,
        params: &IvSolverParams,
    ) -> Result<IvSolution, CalcFailure> {
        if !time.is_finite() || time <= 0.0 {
            return Err(CalcFailure::NonPositiveExpiry);
        }
        for (name, value) in [("spot", spot), ("strike", strike), ("price", market_price)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(CalcFailure::InvalidInput(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        let tolerance = (params.price_tolerance * market_price).max(1e-10);
        let mut lo = params.min_volatility;
        let mut hi = params.max_volatility;

        let lower = Self::price(side, spot, strike, rate, lo, time);
        let upper = Self::price(side, spot, strike, rate, hi, time);
        if market_price < lower - tolerance || market_price > upper + tolerance {
            return Err(CalcFailure::PriceOutOfBounds {
                price: market_price,
                lower,
                upper,
            });
        }

        // Brenner-Subrahmanyam starting point
        let mut vol =
            ((2.0 * std::f64::consts::PI / time).sqrt() * market_price / spot).clamp(lo, hi);
        let mut iterations = 0;

        while iterations < params.max_iterations {
            iterations += 1;

            let diff = Self::price(side, spot, strike, rate, vol, time) - market_price;
            if diff.abs() <= tolerance {
                return Ok(IvSolution {
                    volatility: vol,
                    iterations,
                    residual: diff.abs(),
                    converged: (market_price - lower).abs() > tolerance,
                });
            }

            // Price is increasing in volatility
            if diff > 0.0 {
                hi = vol;
            } else {
                lo = vol;
            }

            let vega = Self::raw_vega(spot, strike, rate, vol, time);
            let newton = vol - diff / vega;
            vol = if vega > 1e-8 && newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };

            if hi - lo < 1e-12 {
                break;
            }
        }

        let residual = (Self::price(side, spot, strike, rate, vol, time) - market_price).abs();
        if residual <= tolerance {
            Ok(IvSolution {
                volatility: vol,
                iterations,
                residual,
                converged: (market_price - lower).abs() > tolerance,
            })
        } else if residual <= params.estimate_tolerance * market_price {
            Ok(IvSolution {
                volatility: vol,
                iterations,
                residual,
                converged: false,
            })
        } else {
            Err(CalcFailure::NoConvergence { iterations, residual })
        }
    }
}
