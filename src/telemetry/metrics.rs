//! Metric instrument factories for capq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("capq")
}

/// Counter: requests accepted by `submit`.
pub fn requests_submitted() -> Counter<u64> {
    meter()
        .u64_counter("capq.requests.submitted")
        .with_description("Number of capture requests submitted")
        .build()
}

/// Counter: requests handed to a worker.
pub fn requests_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("capq.requests.dispatched")
        .with_description("Number of capture requests dispatched to the worker pool")
        .build()
}

/// Counter: requests turned away.
/// Labels: `reason` ("saturated" | "stopped").
pub fn requests_rejected() -> Counter<u64> {
    meter()
        .u64_counter("capq.requests.rejected")
        .with_description("Number of capture requests resolved without dispatch")
        .build()
}

/// Counter: finished captures.
/// Labels: `provider`, `outcome` ("success" | "failure").
pub fn captures_completed() -> Counter<u64> {
    meter()
        .u64_counter("capq.captures.completed")
        .with_description("Number of captures completed")
        .build()
}

/// Histogram: provider capture duration in milliseconds.
/// Labels: `provider`.
pub fn capture_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("capq.capture.duration_ms")
        .with_description("Capture duration in milliseconds")
        .with_unit("ms")
        .build()
}
