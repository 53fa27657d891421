//! Per-peer health bookkeeping: latency buckets and the error-state cold-down ladder.
//!
//! Both types are mutated exclusively under the owning [`AppDirectory`](super::entry::AppDirectory)
//! lock; see `eureka_agent.cpp`'s `CheckInsStatistics`/`CheckInsErrState` for the reference
//! algorithm this reproduces almost verbatim.

// std
use std::collections::VecDeque;
// self
use crate::_prelude::*;

/// Number of retained buckets per latency queue.
const BUCKET_CAPACITY: usize = 10;
/// Number of cold-down/step regimes (`step` ranges over `1..=ERR_STEP_COUNT`).
const ERR_STEP_COUNT: u8 = 4;
/// Cold-down seconds indexed by `step - 1`.
const COLD_DOWN_SECS: [u64; ERR_STEP_COUNT as usize] = [1, 5, 10, 30];
/// Seconds of no-probe elapsed time required to decrease `step` via timeout.
const NO_CHOOSE_DECREASE_SECS: [u64; ERR_STEP_COUNT as usize] = [10, 30, 60, 120];

fn cold_down(step: u8) -> Duration {
	if step == 0 {
		Duration::ZERO
	} else {
		Duration::from_secs(COLD_DOWN_SECS[(step - 1).min(ERR_STEP_COUNT - 1) as usize])
	}
}

fn no_choose_decrease(step: u8) -> Duration {
	if step == 0 {
		Duration::ZERO
	} else {
		Duration::from_secs(NO_CHOOSE_DECREASE_SECS[(step - 1).min(ERR_STEP_COUNT - 1) as usize])
	}
}

/// One bucket of accumulated latency, advanced once per refresh tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct LatencyBucket {
	sum_micros: u64,
	count: u64,
}
impl LatencyBucket {
	/// Mean latency in microseconds, or `0` when the bucket observed nothing.
	pub fn avg_micros(&self) -> u64 {
		if self.count == 0 { 0 } else { self.sum_micros / self.count }
	}

	/// Number of requests folded into this bucket.
	pub fn count(&self) -> u64 {
		self.count
	}

	fn add(&mut self, latency_micros: u64) {
		self.sum_micros = self.sum_micros.saturating_add(latency_micros);
		self.count += 1;
	}
}

/// Bounded latency history for a peer, split by outcome.
///
/// Mirrors `CheckInsStatistics`: one bucket is appended per refresh tick and
/// the oldest is evicted once the queue exceeds [`BUCKET_CAPACITY`].
#[derive(Clone, Debug, Default)]
pub struct LatencyStats {
	request_count_all: u64,
	success: VecDeque<LatencyBucket>,
	error: VecDeque<LatencyBucket>,
}
impl LatencyStats {
	/// All-time request count observed by this peer.
	pub fn request_count_all(&self) -> u64 {
		self.request_count_all
	}

	/// Buckets for successful requests, oldest first.
	pub fn success_buckets(&self) -> &VecDeque<LatencyBucket> {
		&self.success
	}

	/// Buckets for failed requests, oldest first.
	pub fn error_buckets(&self) -> &VecDeque<LatencyBucket> {
		&self.error
	}

	/// Fold one request's outcome into the tail bucket, creating one if empty.
	pub fn record(&mut self, success: bool, latency_micros: u64) {
		self.request_count_all += 1;

		let queue = if success { &mut self.success } else { &mut self.error };

		if queue.is_empty() {
			queue.push_back(LatencyBucket::default());
		}
		queue.back_mut().expect("just ensured non-empty").add(latency_micros);
	}

	/// Advance both bucket queues by one tick, evicting the oldest beyond capacity.
	pub fn next_check(&mut self) {
		if self.success.len() >= BUCKET_CAPACITY {
			self.success.pop_front();
		}
		self.success.push_back(LatencyBucket::default());

		if self.error.len() >= BUCKET_CAPACITY {
			self.error.pop_front();
		}
		self.error.push_back(LatencyBucket::default());
	}
}

/// Cold-down ladder and current-window error/success counters for one peer.
///
/// `step` only ever changes at a [`next_check`](Self::next_check) boundary or
/// on a full [`reset`](Self::reset) triggered by an endpoint change.
#[derive(Clone, Debug, Default)]
pub struct ErrorState {
	step: u8,
	err_time: Option<Instant>,
	in_flight: u32,
	good: u64,
	err: u64,
	err_prev: u64,
}
impl ErrorState {
	/// Current cold-down step, `0` meaning no cold-down applies.
	pub fn step(&self) -> u8 {
		self.step
	}

	/// Number of handles currently constructed against the owning peer.
	pub fn in_flight(&self) -> u32 {
		self.in_flight
	}

	/// Whether the peer is presently in the error regime (`step > 0`).
	///
	/// The reference implementation's `isErr()` literally reads `step == 0`,
	/// which inverts the name; every call site that matters treats `step > 0`
	/// as "in error", and that is the convention this crate follows.
	pub fn is_err(&self) -> bool {
		self.step > 0
	}

	/// Increment the in-flight handle count. Called under the app lock when a
	/// [`Handle`](crate::selection::Handle) is constructed against this peer.
	pub fn inc_in_flight(&mut self) {
		self.in_flight += 1;
	}

	/// Decrement the in-flight handle count. Called under the app lock when a
	/// handle is dropped.
	pub fn dec_in_flight(&mut self) {
		self.in_flight = self.in_flight.saturating_sub(1);
	}

	/// Record the outcome of one request.
	pub fn on_request_done(&mut self, success: bool) {
		if success {
			self.good += 1;
		} else {
			if self.err == 0 {
				self.err_time = Some(Instant::now());
			}
			self.err += 1;
		}
	}

	/// Eligibility predicate consulted by selection.
	pub fn try_choose(&self) -> bool {
		if self.step == 0 && self.err == 0 {
			return true;
		}

		if self.in_cold_down() {
			return false;
		}

		self.in_flight == 0 || self.err_prev == 0
	}

	fn in_cold_down(&self) -> bool {
		if self.step == 0 {
			return false;
		}

		let Some(err_time) = self.err_time else { return false };

		Instant::now().saturating_duration_since(err_time) <= cold_down(self.step)
	}

	/// Advance the ladder by one check tick; called once per refresh tick for
	/// every peer, regardless of whether it was probed this window.
	pub fn next_check(&mut self) {
		self.err_prev = self.err;

		if self.step > 0 {
			let elapsed =
				self.err_time.map(|t| Instant::now().saturating_duration_since(t)).unwrap_or_default();

			if self.err == 0 && self.good > 0 {
				self.step -= 1;
			} else if elapsed >= no_choose_decrease(self.step) {
				self.step -= 1;
			} else if self.err > 0 && self.step < ERR_STEP_COUNT {
				self.step += 1;
			}
		} else if self.err > 0 {
			self.step = 1;
		}

		self.err = 0;
		self.good = 0;
	}

	/// Fully reset the ladder, as done when a peer's endpoint changes on refresh.
	pub fn reset(&mut self) {
		*self = Self::default();
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn promotes_to_step_one_on_first_error_and_cools_down() {
		let mut state = ErrorState::default();

		state.on_request_done(false);

		assert!(!state.try_choose(), "error just occurred, step still 0 but err>0 blocks nothing yet");

		state.next_check();

		assert_eq!(state.step(), 1);
		assert!(!state.try_choose(), "within the 1s cold-down window");
	}

	#[test]
	fn recovers_when_good_requests_follow() {
		let mut state = ErrorState { step: 3, good: 5, ..Default::default() };

		state.next_check();

		assert_eq!(state.step(), 2);
		assert_eq!(state.err_prev, 0);
	}

	#[test]
	fn stale_probe_timeout_decreases_step_without_success() {
		let mut state = ErrorState {
			step: 2,
			err_time: Some(Instant::now() - Duration::from_secs(31)),
			..Default::default()
		};

		state.next_check();

		assert_eq!(state.step(), 1);
	}

	#[test]
	fn deteriorates_while_errors_keep_occurring() {
		let mut state = ErrorState {
			step: 1,
			err: 1,
			err_time: Some(Instant::now() - Duration::from_millis(1)),
			..Default::default()
		};

		state.next_check();

		assert_eq!(state.step(), 2);
	}

	#[test]
	fn step_never_exceeds_ladder_ceiling() {
		let mut state =
			ErrorState { step: ERR_STEP_COUNT, err: 1, err_time: Some(Instant::now()), ..Default::default() };

		state.next_check();

		assert_eq!(state.step(), ERR_STEP_COUNT);
	}

	#[test]
	fn endpoint_change_fully_resets_ladder() {
		let mut state = ErrorState { step: 3, in_flight: 2, good: 1, err: 4, ..Default::default() };

		state.reset();

		assert_eq!(state.step(), 0);
		assert_eq!(state.in_flight(), 0);
	}

	#[test]
	fn latency_stats_advance_and_evict_oldest_bucket() {
		let mut stats = LatencyStats::default();

		for _ in 0..12 {
			stats.next_check();
		}

		assert_eq!(stats.success_buckets().len(), BUCKET_CAPACITY);
		assert_eq!(stats.error_buckets().len(), BUCKET_CAPACITY);
	}

	#[test]
	fn latency_stats_record_folds_into_tail_bucket() {
		let mut stats = LatencyStats::default();

		stats.record(true, 100);
		stats.record(true, 300);

		assert_eq!(stats.request_count_all(), 2);
		assert_eq!(stats.success_buckets().back().unwrap().avg_micros(), 200);
	}
}
