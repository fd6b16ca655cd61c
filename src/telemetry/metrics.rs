//! Metric instrument factories for courtier.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op and these cost
//! next to nothing.

use opentelemetry::metrics::{Counter, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("courtier")
}

/// Counter: channels registered with a broker.
pub fn channels_enrolled() -> Counter<u64> {
    meter()
        .u64_counter("courtier.broker.channels_enrolled")
        .with_description("Channels enrolled with the broker")
        .build()
}

/// Counter: orphaned channels removed during enrollment.
pub fn channels_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("courtier.broker.channels_reclaimed")
        .with_description("Retired channels reclaimed by the broker")
        .build()
}

/// Counter: work items handed to a consumer.
pub fn items_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("courtier.broker.items_dispatched")
        .with_description("Work items handed out to consumers")
        .build()
}

/// Counter: results routed to a live channel.
pub fn results_delivered() -> Counter<u64> {
    meter()
        .u64_counter("courtier.broker.results_delivered")
        .with_description("Results delivered to their producer")
        .build()
}

/// Counter: results dropped because their channel is gone.
/// Labels: `channel`.
pub fn results_discarded() -> Counter<u64> {
    meter()
        .u64_counter("courtier.broker.results_discarded")
        .with_description("Results discarded for lack of a live channel")
        .build()
}

/// Counter: "no work" replies seen by remote workers.
pub fn remote_stalls() -> Counter<u64> {
    meter()
        .u64_counter("courtier.net.stalls")
        .with_description("Retrievals that found no work")
        .build()
}

/// Counter: failed TCP connection attempts by remote workers.
pub fn connection_failures() -> Counter<u64> {
    meter()
        .u64_counter("courtier.net.connection_failures")
        .with_description("Failed connection attempts")
        .build()
}
