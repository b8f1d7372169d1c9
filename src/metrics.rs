// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {
    Count,
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = ($name, $value $(, $label, $label_value)*);
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = ($name, $value $(, $label, $label_value)*);
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = ($name, $value $(, $label, $label_value)*);
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = ($name $(, $label, $label_value)*);
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {{
        let _ = ($name, $desc);
    }};
    ($name:expr, $desc:expr) => {{
        let _ = ($name, $desc);
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {{
        let _ = ($name, $desc);
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {{
        let _ = ($name, $desc);
    }};
    ($name:expr, $desc:expr) => {{
        let _ = ($name, $desc);
    }};
}

#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

/// Registers descriptions for every metric the SDK emits.
/// Call once at startup, after installing an exporter.
pub fn describe_metrics() {
    describe_counter!(
        "sdk_cache_hits_total",
        Unit::Count,
        "Cache lookups answered from a fresh entry, labeled by key group."
    );
    describe_counter!(
        "sdk_cache_miss_total",
        Unit::Count,
        "Cache lookups that ran the producer, labeled by key group and reason."
    );
    describe_counter!(
        "sdk_cache_write_failures_total",
        Unit::Count,
        "Best-effort cache writes that the store rejected."
    );
    describe_gauge!("sdk_cache_size", "Number of entries under the cache prefix.");
    describe_counter!(
        "sdk_stack_decode_total",
        Unit::Count,
        "Pool state stacks decoded, labeled by schema version and outcome."
    );
    describe_counter!(
        "sdk_remote_calls_total",
        Unit::Count,
        "Get-method calls sent to the remote API, labeled by method and outcome."
    );
    describe_histogram!(
        "sdk_remote_call_duration_seconds",
        "Latency of get-method calls in seconds, labeled by method."
    );
}

/// Installs the Prometheus exporter on `addr` and describes all metrics.
#[cfg(feature = "observability")]
pub fn init_prometheus(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

/// Key group used as a metric label: the segment after the cache prefix.
fn key_group(key: &str) -> String {
    key.split('-').nth(2).unwrap_or(key).to_string()
}

pub fn increment_cache_hit(key: &str) {
    counter!("sdk_cache_hits_total", 1, "group" => key_group(key));
}

pub fn increment_cache_miss(key: &str, reason: &'static str) {
    counter!("sdk_cache_miss_total", 1, "group" => key_group(key), "reason" => reason);
}

pub fn increment_cache_write_failure() {
    increment_counter!("sdk_cache_write_failures_total");
}

pub fn set_cache_size(size: f64) {
    gauge!("sdk_cache_size", size);
}

pub fn increment_stack_decode(schema: &'static str, outcome: &'static str) {
    counter!("sdk_stack_decode_total", 1, "schema" => schema, "outcome" => outcome);
}

pub fn record_remote_call(method: &str, success: bool, duration: std::time::Duration) {
    let outcome = if success { "ok" } else { "error" };
    counter!("sdk_remote_calls_total", 1, "method" => method.to_string(), "outcome" => outcome);
    histogram!(
        "sdk_remote_call_duration_seconds",
        duration.as_secs_f64(),
        "method" => method.to_string()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_group_takes_segment_after_prefix() {
        assert_eq!(key_group("network-cache-payouts-EQabc"), "payouts");
        assert_eq!(key_group("single"), "single");
    }

    #[test]
    fn recorders_are_safe_without_exporter() {
        describe_metrics();
        increment_cache_hit("network-cache-poolInfo");
        increment_cache_miss("network-cache-poolInfo", "expired");
        record_remote_call("get_pool_full_data", true, std::time::Duration::from_millis(5));
    }
}
