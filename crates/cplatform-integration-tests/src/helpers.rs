//! Test helpers and utilities

use crate::mocks::GatewayCall;
use anyhow::{Context, Result};

/// Initialize tracing for tests (call once at start of test)
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cplatform_operator=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Index of the first call of `operation`
pub fn first_index(calls: &[GatewayCall], operation: &str) -> Result<usize> {
    calls
        .iter()
        .position(|c| c.operation() == operation)
        .with_context(|| format!("no {} call in {:?}", operation, operations(calls)))
}

/// Index of the last call of `operation`
pub fn last_index(calls: &[GatewayCall], operation: &str) -> Result<usize> {
    calls
        .iter()
        .rposition(|c| c.operation() == operation)
        .with_context(|| format!("no {} call in {:?}", operation, operations(calls)))
}

/// Operation names of `calls`, in order
pub fn operations(calls: &[GatewayCall]) -> Vec<&'static str> {
    calls.iter().map(GatewayCall::operation).collect()
}

/// Only the calls that change remote state
pub fn mutations(calls: &[GatewayCall]) -> Vec<GatewayCall> {
    calls.iter().filter(|c| c.is_mutation()).cloned().collect()
}
