//! Metrics collection and exposition.
//!
//! # Metrics
//! - `webhooks_received_total` (counter): by webhook_type, webhook_code, outcome
//! - `webhook_processing_seconds` (histogram): intake to response
//! - `provider_requests_total` (counter): by endpoint, outcome
//! - `link_session_tokens_total` (counter): public tokens by outcome
//! - `item_status_transitions_total` (counter): by new status
//! - `cipher_key_cache_misses_total` (counter): by lookup kind
//! - `transactions_synced_total` (counter): by change (upserted, removed, skipped)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_webhook(webhook_type: &str, webhook_code: &str, outcome: &'static str, started: Instant) {
    counter!(
        "webhooks_received_total",
        "webhook_type" => webhook_type.to_string(),
        "webhook_code" => webhook_code.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
    histogram!("webhook_processing_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_provider_request(endpoint: &'static str, outcome: &'static str) {
    counter!("provider_requests_total", "endpoint" => endpoint, "outcome" => outcome).increment(1);
}

pub fn record_link_token_outcome(outcome: &'static str) {
    counter!("link_session_tokens_total", "outcome" => outcome).increment(1);
}

pub fn record_status_transition(status: &'static str) {
    counter!("item_status_transitions_total", "status" => status).increment(1);
}

pub fn record_key_cache_miss(kind: &'static str) {
    counter!("cipher_key_cache_misses_total", "kind" => kind).increment(1);
}

pub fn record_transactions_synced(change: &'static str, count: u32) {
    if count > 0 {
        counter!("transactions_synced_total", "change" => change).increment(u64::from(count));
    }
}
