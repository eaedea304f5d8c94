//! Unit tests for greeks-signal-engine components

#[path = "../common/mod.rs"]
mod common;

mod calculator_tests; // Broker-first IV and fallbacks
mod health_tests; // Verdict ordering and history
