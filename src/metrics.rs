//! Metrics helpers and per-peer telemetry bookkeeping.

// std
use std::sync::{
	OnceLock,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_REQUESTS_TOTAL: &str = "eureka_agent_requests_total";
const METRIC_REQUEST_ERRORS: &str = "eureka_agent_request_errors_total";
const METRIC_REQUEST_DURATION: &str = "eureka_agent_request_duration_seconds";
const METRIC_HEARTBEAT_TOTAL: &str = "eureka_agent_heartbeat_total";
const METRIC_REFRESH_TOTAL: &str = "eureka_agent_refresh_total";
const METRIC_PEER_STEP: &str = "eureka_agent_peer_error_step";

/// Shared Prometheus handle installed by [`install_default_exporter`].
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe metrics accumulator for a single peer instance.
#[derive(Debug, Default)]
pub struct PeerMetrics {
	total_requests: AtomicU64,
	request_errors: AtomicU64,
	last_latency_micros: AtomicU64,
}
impl PeerMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record the outcome of one request against this peer.
	pub fn record_request(&self, success: bool, latency_micros: u64) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
		self.last_latency_micros.store(latency_micros, Ordering::Relaxed);

		if !success {
			self.request_errors.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> PeerMetricsSnapshot {
		PeerMetricsSnapshot {
			total_requests: self.total_requests.load(Ordering::Relaxed),
			request_errors: self.request_errors.load(Ordering::Relaxed),
			last_latency_micros: match self.last_latency_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-peer telemetry counters.
#[derive(Clone, Debug)]
pub struct PeerMetricsSnapshot {
	/// Total number of requests dispatched to this peer.
	pub total_requests: u64,
	/// Count of requests that counted as failures for the error ladder.
	pub request_errors: u64,
	/// Microsecond latency of the most recent request.
	pub last_latency_micros: Option<u64>,
}
impl PeerMetricsSnapshot {
	/// Ratio of failed requests over total requests.
	pub fn error_rate(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			self.request_errors as f64 / self.total_requests as f64
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record the outcome of one request made through a [`Handle`](crate::selection::Handle).
pub fn record_request(app_id: &str, instance_id: &str, success: bool, duration: Duration) {
	let labels = peer_labels(app_id, instance_id);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::histogram!(METRIC_REQUEST_DURATION, labels.iter()).record(duration.as_secs_f64());

	if !success {
		metrics::counter!(METRIC_REQUEST_ERRORS, labels.iter()).increment(1);
	}
}

/// Record a heartbeat attempt for a self-registered instance.
pub fn record_heartbeat(app_id: &str, instance_id: &str, success: bool) {
	let labels = status_labels(app_id, instance_id, if success { "success" } else { "error" });

	metrics::counter!(METRIC_HEARTBEAT_TOTAL, labels.iter()).increment(1);
}

/// Record a directory refresh attempt for an application.
pub fn record_refresh(app_id: &str, success: bool) {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("app", app_id.to_owned()));
	labels.push(Label::new("status", if success { "success" } else { "error" }));

	metrics::counter!(METRIC_REFRESH_TOTAL, labels.iter()).increment(1);
}

/// Publish a peer's current error-ladder step as a gauge.
pub fn record_peer_step(app_id: &str, instance_id: &str, step: u8) {
	let labels = peer_labels(app_id, instance_id);

	metrics::gauge!(METRIC_PEER_STEP, labels.iter()).set(step as f64);
}

fn peer_labels(app_id: &str, instance_id: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("app", app_id.to_owned()));
	labels.push(Label::new("instance", instance_id.to_owned()));

	labels
}

fn status_labels(app_id: &str, instance_id: &str, status: &'static str) -> LabelSet {
	let mut labels = peer_labels(app_id, instance_id);

	labels.push(Label::new("status", status));

	labels
}

#[cfg(test)]
mod tests {
	// std
	use std::borrow::Borrow;
	// crates.io
	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};
	// self
	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter.snapshot().into_vec().into_iter().map(|(key, _, _, value)| (key, value)).collect()
	}

	fn counter_value(
		snapshot: &[(CompositeKey, DebugValue)],
		name: &str,
		labels: &[(&str, &str)],
	) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				(key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == name
					&& labels_match(key, labels))
				.then(|| match value {
					DebugValue::Counter(value) => *value,
					_ => 0,
				})
			})
			.unwrap_or(0)
	}

	fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
		let mut labels: Vec<_> = key.key().labels().map(|label| (label.key(), label.value())).collect();

		labels.sort_unstable();

		let mut expected_sorted: Vec<_> = expected.to_vec();

		expected_sorted.sort_unstable();

		labels.len() == expected_sorted.len()
			&& labels
				.into_iter()
				.zip(expected_sorted.into_iter())
				.all(|((lk, lv), (ek, ev))| lk == ek && lv == ev)
	}

	#[test]
	fn peer_metrics_snapshot_tracks_errors_and_latency() {
		let metrics = PeerMetrics::new();

		metrics.record_request(true, 150);
		metrics.record_request(false, 300);

		let snapshot = metrics.snapshot();

		assert_eq!(snapshot.total_requests, 2);
		assert_eq!(snapshot.request_errors, 1);
		assert_eq!(snapshot.last_latency_micros, Some(300));
		assert!((snapshot.error_rate() - 0.5).abs() < 1e-9);
	}

	#[test]
	fn records_request_and_heartbeat_counters() {
		let snapshot = capture_metrics(|| {
			record_request("MY-APP", "i-1", true, Duration::from_millis(20));
			record_request("MY-APP", "i-1", false, Duration::from_millis(5));
			record_heartbeat("MY-APP", "i-1", true);
		});
		let peer = [("app", "MY-APP"), ("instance", "i-1")];
		let hb_success = [("app", "MY-APP"), ("instance", "i-1"), ("status", "success")];

		assert_eq!(counter_value(&snapshot, "eureka_agent_requests_total", &peer), 2);
		assert_eq!(counter_value(&snapshot, "eureka_agent_request_errors_total", &peer), 1);
		assert_eq!(counter_value(&snapshot, "eureka_agent_heartbeat_total", &hb_success), 1);
	}
}
