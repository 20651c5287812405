//! OTel-native message metrics.
//!
//! Instruments are lazily initialized on the global meter provider.
//! Naming follows OTel semantic conventions (dot-separated).

use std::sync::LazyLock;
use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

use super::{ErrorContext, MessageMonitor};
use crate::listener::DispatchError;

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("herald"));

// ============================================================================
// Consumption
// ============================================================================

/// Messages admitted for dispatch.
static MESSAGE_RECEIVED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("herald.message.received")
        .with_description("Messages received and admitted for dispatch")
        .build()
});

/// Messages handled and acknowledged.
static MESSAGE_PROCESSED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("herald.message.processed")
        .with_description("Messages handled and acknowledged")
        .build()
});

static HANDLER_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("herald.handler.duration")
        .with_description("Time spent in handlers per message")
        .with_unit("s")
        .build()
});

static DISPATCH_ERRORS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("herald.dispatch.errors")
        .with_description("Dispatch failures by kind")
        .build()
});

static RECEIVE_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("herald.receive.duration")
        .with_description("Queue receive call duration")
        .with_unit("s")
        .build()
});

static THROTTLE_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("herald.throttle.duration")
        .with_description("Time the receive loop waited for a free slot")
        .with_unit("s")
        .build()
});

// ============================================================================
// Publishing
// ============================================================================

static PUBLISH_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("herald.publish.duration")
        .with_description("Publish duration")
        .with_unit("s")
        .build()
});

static PUBLISH_ERRORS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("herald.publish.errors")
        .with_description("Failed publishes")
        .build()
});

/// Records message flow as OpenTelemetry metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelMonitor;

impl MessageMonitor for OtelMonitor {
    fn message_received(&self, queue: &str) {
        MESSAGE_RECEIVED_TOTAL.add(1, &[KeyValue::new("queue", queue.to_string())]);
    }

    fn message_processed(&self, queue: &str, message_type: &str) {
        MESSAGE_PROCESSED_TOTAL.add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("message_type", message_type.to_string()),
            ],
        );
    }

    fn handle_time(&self, queue: &str, message_type: &str, elapsed: Duration) {
        HANDLER_DURATION.record(
            elapsed.as_secs_f64(),
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("message_type", message_type.to_string()),
            ],
        );
    }

    fn report_error(&self, error: &DispatchError, context: &ErrorContext<'_>) {
        DISPATCH_ERRORS_TOTAL.add(
            1,
            &[
                KeyValue::new("queue", context.queue.to_string()),
                KeyValue::new("kind", error.kind()),
            ],
        );
    }

    fn receive_time(&self, queue: &str, elapsed: Duration) {
        RECEIVE_DURATION.record(
            elapsed.as_secs_f64(),
            &[KeyValue::new("queue", queue.to_string())],
        );
    }

    fn throttled(&self, queue: &str, waited: Duration) {
        THROTTLE_DURATION.record(
            waited.as_secs_f64(),
            &[KeyValue::new("queue", queue.to_string())],
        );
    }

    fn publish_time(&self, message_type: &str, elapsed: Duration) {
        PUBLISH_DURATION.record(
            elapsed.as_secs_f64(),
            &[KeyValue::new("message_type", message_type.to_string())],
        );
    }

    fn publish_failed(&self, message_type: &str, _error: &str) {
        PUBLISH_ERRORS_TOTAL.add(
            1,
            &[KeyValue::new("message_type", message_type.to_string())],
        );
    }
}
