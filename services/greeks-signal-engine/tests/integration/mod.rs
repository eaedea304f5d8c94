//! Integration tests for the signal orchestrator

#[path = "../common/mod.rs"]
mod common;
