//! Endpoint-failover retry policy for registry HTTP exchanges.
//!
//! Mirrors the upstream client's request loop: a network-level error advances
//! to the next endpoint, a `307` redirect retargets to the `Location` header,
//! a literal `500` sleeps 200ms before retrying the same endpoint, any other
//! non-2xx/non-4xx status retries the same endpoint immediately, `4xx` is
//! terminal, and the whole attempt budget is `2 * endpoints.len()`.

// crates.io
use reqwest::StatusCode;
use url::Url;
// self
use crate::_prelude::*;

/// User-supplied override deciding whether an attempt should be retried.
///
/// Receives the 1-based attempt count and the status observed (`None` for a
/// network-level failure that never produced a response). Returning `true`
/// permits another attempt regardless of the built-in budget; returning
/// `false` stops retrying even if budget remains.
pub type RetryFn = Arc<dyn Fn(u32, Option<StatusCode>) -> bool + Send + Sync>;

/// What the executor decided to do after observing an attempt's outcome.
#[derive(Debug)]
pub enum RetryDecision {
	/// Retry is exhausted or disallowed; propagate the error.
	Stop,
	/// Retry the same endpoint after the given backoff.
	SameEndpoint { backoff: Duration },
	/// Retry against the next endpoint in rotation, after the given backoff.
	NextEndpoint { backoff: Duration },
	/// Retry against an explicit endpoint (a `307` `Location` target),
	/// after the given backoff.
	Redirect { target: Url, backoff: Duration },
}

/// Fixed backoff applied only to a `500` response, matching the reference
/// client's `defaultRetry` (no backoff for network errors, redirects, or
/// any other non-2xx/4xx status).
const SERVER_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Tracks attempt budget and current endpoint while a single logical
/// request is retried across the configured endpoint list.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	endpoints: &'a [Url],
	retry_fn: Option<&'a RetryFn>,
	cursor: usize,
	/// Set by an accepted `307` redirect; overrides [`current_endpoint`](Self::current_endpoint)
	/// for the remainder of this logical request only. A network error clears
	/// it, since that means falling back to the configured endpoint list.
	redirect_target: Option<Url>,
	attempts: u32,
	max_attempts: u32,
}
impl<'a> RetryExecutor<'a> {
	/// Create a new executor starting at `start_index` within `endpoints`.
	///
	/// Panics if `endpoints` is empty; callers must validate configuration
	/// before reaching this point.
	pub fn new(endpoints: &'a [Url], start_index: usize, retry_fn: Option<&'a RetryFn>) -> Self {
		assert!(!endpoints.is_empty(), "retry executor requires at least one endpoint");

		Self {
			endpoints,
			retry_fn,
			cursor: start_index % endpoints.len(),
			redirect_target: None,
			attempts: 0,
			// Matches the reference client's default budget: two passes over
			// the full endpoint list.
			max_attempts: (2 * endpoints.len()) as u32,
		}
	}

	/// Endpoint the next attempt should target: the last accepted redirect
	/// target if one is outstanding, otherwise the endpoint list cursor.
	pub fn current_endpoint(&self) -> &Url {
		self.redirect_target.as_ref().unwrap_or(&self.endpoints[self.cursor])
	}

	/// Index of [`current_endpoint`](Self::current_endpoint) within the configured list.
	pub fn current_index(&self) -> usize {
		self.cursor
	}

	/// Number of attempts made so far.
	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	/// Decide how to proceed after a network-level failure (no response received).
	pub fn on_net_error(&mut self) -> RetryDecision {
		self.attempts += 1;

		if !self.budget_allows(None) {
			return RetryDecision::Stop;
		}

		self.redirect_target = None;
		self.cursor = (self.cursor + 1) % self.endpoints.len();

		RetryDecision::NextEndpoint { backoff: Duration::ZERO }
	}

	/// Decide how to proceed after receiving an HTTP response.
	pub fn on_response(&mut self, status: StatusCode, location: Option<&str>) -> RetryDecision {
		self.attempts += 1;

		if status.is_success() {
			return RetryDecision::Stop;
		}

		// 4xx is the only definitive, non-retryable error class.
		if status.is_client_error() {
			return RetryDecision::Stop;
		}

		if status == StatusCode::TEMPORARY_REDIRECT {
			if let Some(location) = location
				&& !location.is_empty()
				&& let Ok(target) = self.current_endpoint().join(location)
			{
				if !self.budget_allows(Some(status)) {
					return RetryDecision::Stop;
				}

				self.redirect_target = Some(target.clone());

				return RetryDecision::Redirect { target, backoff: Duration::ZERO };
			}

			// Missing or empty Location: fail without retry.
			return RetryDecision::Stop;
		}

		if !self.budget_allows(Some(status)) {
			return RetryDecision::Stop;
		}

		// Only a literal 500 sleeps before retrying; every other retryable
		// status (other 5xx, other 3xx, ...) retries the current endpoint
		// immediately.
		let backoff =
			if status == StatusCode::INTERNAL_SERVER_ERROR { SERVER_ERROR_BACKOFF } else { Duration::ZERO };

		RetryDecision::SameEndpoint { backoff }
	}

	fn budget_allows(&self, status: Option<StatusCode>) -> bool {
		if let Some(retry_fn) = self.retry_fn {
			return retry_fn(self.attempts, status);
		}

		// Matches the reference client's `tryCount > 2*n` stop condition: a
		// retry is still permitted when `attempts == max_attempts`.
		self.attempts <= self.max_attempts
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn endpoints(n: usize) -> Vec<Url> {
		(0..n).map(|i| Url::parse(&format!("http://host-{i}.example/")).unwrap()).collect()
	}

	#[test]
	fn budget_is_twice_the_endpoint_count() {
		let eps = endpoints(3);
		let mut executor = RetryExecutor::new(&eps, 0, None);

		for _ in 0..6 {
			assert!(matches!(executor.on_net_error(), RetryDecision::NextEndpoint { .. }));
		}

		assert!(matches!(executor.on_net_error(), RetryDecision::Stop));
	}

	#[test]
	fn net_error_advances_endpoint_cursor() {
		let eps = endpoints(2);
		let mut executor = RetryExecutor::new(&eps, 0, None);

		assert_eq!(executor.current_index(), 0);
		executor.on_net_error();
		assert_eq!(executor.current_index(), 1);
		executor.on_net_error();
		assert_eq!(executor.current_index(), 0);
	}

	#[test]
	fn server_error_retries_same_endpoint() {
		let eps = endpoints(2);
		let mut executor = RetryExecutor::new(&eps, 1, None);

		let decision = executor.on_response(StatusCode::INTERNAL_SERVER_ERROR, None);

		assert!(matches!(decision, RetryDecision::SameEndpoint { .. }));
		assert_eq!(executor.current_index(), 1);
	}

	#[test]
	fn temporary_redirect_retargets_to_location() {
		let eps = endpoints(1);
		let mut executor = RetryExecutor::new(&eps, 0, None);
		let decision = executor
			.on_response(StatusCode::TEMPORARY_REDIRECT, Some("http://other.example/apps"));

		match decision {
			RetryDecision::Redirect { target, .. } => {
				assert_eq!(target.as_str(), "http://other.example/apps");
			},
			other => panic!("expected redirect decision, got {other:?}"),
		}
	}

	#[test]
	fn redirect_target_overrides_current_endpoint_until_next_error() {
		let eps = endpoints(1);
		let mut executor = RetryExecutor::new(&eps, 0, None);

		executor.on_response(StatusCode::TEMPORARY_REDIRECT, Some("http://other.example/apps"));

		assert_eq!(executor.current_endpoint().as_str(), "http://other.example/apps");

		executor.on_net_error();

		assert_eq!(executor.current_endpoint().as_str(), eps[0].as_str());
	}

	#[test]
	fn missing_location_on_redirect_stops_without_retry() {
		let eps = endpoints(1);
		let mut executor = RetryExecutor::new(&eps, 0, None);

		assert!(matches!(
			executor.on_response(StatusCode::TEMPORARY_REDIRECT, None),
			RetryDecision::Stop
		));
	}

	#[test]
	fn client_error_is_not_retried() {
		let eps = endpoints(1);
		let mut executor = RetryExecutor::new(&eps, 0, None);

		assert!(matches!(executor.on_response(StatusCode::NOT_FOUND, None), RetryDecision::Stop));
	}
}
