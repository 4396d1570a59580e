//! Prometheus metrics for test runs
//!
//! Exposes metrics for:
//! - Transaction submissions and transport failures
//! - Gas burnt per network
//! - Sandbox server starts

use crate::error::{RunnerError, RunnerResult};

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};

lazy_static! {
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "near_runner_transactions_submitted_total",
        "Total transactions submitted",
        &["network_id"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "near_runner_transactions_failed_total",
        "Total transactions whose submission failed at the transport level",
        &["network_id"]
    ).unwrap();

    pub static ref TX_EXECUTION_FAILED: CounterVec = register_counter_vec!(
        "near_runner_transactions_execution_failed_total",
        "Total transactions that executed with a failure status",
        &["network_id"]
    ).unwrap();

    pub static ref GAS_BURNT: CounterVec = register_counter_vec!(
        "near_runner_gas_burnt_total",
        "Total gas burnt by transactions and receipts",
        &["network_id"]
    ).unwrap();

    pub static ref SANDBOX_STARTS: CounterVec = register_counter_vec!(
        "near_runner_sandbox_starts_total",
        "Total sandbox servers started",
        &[]
    ).unwrap();
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> RunnerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RunnerError::Decode(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| RunnerError::Decode(e.to_string()))
}

// Helper functions to record metrics

pub fn record_tx_submitted(network_id: &str) {
    TX_SUBMITTED.with_label_values(&[network_id]).inc();
}

pub fn record_tx_failed(network_id: &str) {
    TX_FAILED.with_label_values(&[network_id]).inc();
}

pub fn record_tx_execution_failed(network_id: &str) {
    TX_EXECUTION_FAILED.with_label_values(&[network_id]).inc();
}

pub fn record_gas_burnt(network_id: &str, gas: u64) {
    GAS_BURNT
        .with_label_values(&[network_id])
        .inc_by(gas as f64);
}

pub fn record_sandbox_start() {
    SANDBOX_STARTS.with_label_values(&[]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_metrics() {
        record_tx_submitted("metrics-test");
        record_gas_burnt("metrics-test", 1_500);

        let text = render().unwrap();
        assert!(text.contains("near_runner_transactions_submitted_total"));
        assert!(text.contains("metrics-test"));
        assert!(GAS_BURNT.with_label_values(&["metrics-test"]).get() >= 1_500.0);
    }
}
