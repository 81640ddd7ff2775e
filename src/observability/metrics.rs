//! Prometheus counters for the consumer loop and the handlers.

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

pub(crate) struct Metrics {
    registry: Registry,
    messages_consumed: IntCounter,
    messages_acked: IntCounter,
    messages_nacked: IntCounter,
    stale_skips: IntCounter,
    error_transitions: IntCounter,
    publish_failures: IntCounter,
    handler_timeouts: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub(crate) fn new() -> Result<Self> {
        let registry = Registry::new();

        let messages_consumed = IntCounter::new(
            "orchestrator_messages_consumed_total",
            "Notifications pulled from the inbound queue",
        )?;
        let messages_acked = IntCounter::new(
            "orchestrator_messages_acked_total",
            "Notifications acknowledged",
        )?;
        let messages_nacked = IntCounter::new(
            "orchestrator_messages_nacked_total",
            "Notifications rejected to the dead-letter exchange",
        )?;
        let stale_skips = IntCounter::new(
            "orchestrator_stale_skips_total",
            "Notifications skipped because the target already moved on",
        )?;
        let error_transitions = IntCounter::new(
            "orchestrator_error_transitions_total",
            "Entities moved to an error state",
        )?;
        let publish_failures = IntCounter::new(
            "orchestrator_publish_failures_total",
            "Post-commit publishes that exhausted their retries",
        )?;
        let handler_timeouts = IntCounter::new(
            "orchestrator_handler_timeouts_total",
            "Handler invocations cancelled by the per-message deadline",
        )?;

        for counter in [
            &messages_consumed,
            &messages_acked,
            &messages_nacked,
            &stale_skips,
            &error_transitions,
            &publish_failures,
            &handler_timeouts,
        ] {
            registry
                .register(Box::new(counter.clone()))
                .context("failed to register metric")?;
        }

        Ok(Self {
            registry,
            messages_consumed,
            messages_acked,
            messages_nacked,
            stale_skips,
            error_transitions,
            publish_failures,
            handler_timeouts,
        })
    }

    pub(crate) fn record_consumed(&self) {
        self.messages_consumed.inc();
    }

    pub(crate) fn record_acked(&self) {
        self.messages_acked.inc();
    }

    pub(crate) fn record_nacked(&self) {
        self.messages_nacked.inc();
    }

    pub(crate) fn record_stale_skip(&self) {
        self.stale_skips.inc();
    }

    pub(crate) fn record_error_transition(&self) {
        self.error_transitions.inc();
    }

    pub(crate) fn record_publish_failure(&self) {
        self.publish_failures.inc();
    }

    pub(crate) fn record_handler_timeout(&self) {
        self.handler_timeouts.inc();
    }

    pub(crate) fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .ok();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_in_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.record_consumed();
        metrics.record_acked();
        metrics.record_stale_skip();

        let rendered = metrics.render();
        assert!(rendered.contains("orchestrator_messages_consumed_total 1"));
        assert!(rendered.contains("orchestrator_stale_skips_total 1"));
    }
}
