//! Peer selection and request handles.
//!
//! Grounded on `eureka_agent.cpp`'s `getHttpClient`/`InsHttpClient`: a handle
//! pins one peer for the duration of a logical request, tracking in-flight
//! count and reporting the outcome back to the peer's health ladder.

// crates.io
use bytes::Bytes;
use reqwest::Method;
// self
use crate::{
	_prelude::*,
	directory::{
		Refresher,
		entry::{AppDirectory, PeerCandidate, PeerInstance},
	},
	http::client::{self, Exchange},
};

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default selection policy: the first eligible candidate in scan order,
/// starting from the directory's round-robin cursor.
fn default_choose(candidates: &[PeerCandidate]) -> Option<usize> {
	candidates.iter().position(|c| c.eligible)
}

/// A pinned reference to one peer for the lifetime of a logical request.
///
/// Constructing a handle increments the peer's in-flight counter; dropping it
/// decrements it again on a spawned task, since [`Drop`] cannot await the
/// peer's mutex directly.
pub struct Handle {
	peer: Arc<PeerInstance>,
}
impl Handle {
	async fn new(peer: Arc<PeerInstance>) -> Self {
		peer.inc_in_flight().await;

		Self { peer }
	}

	/// Instance id this handle is pinned to.
	pub fn instance_id(&self) -> &str {
		self.peer.instance_id()
	}

	/// Send a request to the pinned peer, returning whatever HTTP response it
	/// produces regardless of status. Only a transport-level failure (no
	/// response at all) counts as a failure for health-ladder purposes or is
	/// surfaced as an error; a `4xx`/`5xx` response is still `Ok` here, same
	/// as a `2xx` one. Callers that need non-`2xx` to be a hard error want
	/// [`Handle::request_resp_data`] instead.
	pub async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Exchange> {
		let endpoint = self.peer.endpoint().await;
		let client = self.peer.client().await;
		let started = Instant::now();
		let attempt = client::request(&client, method, &endpoint, path, body, ATTEMPT_TIMEOUT).await;
		let latency_micros = started.elapsed().as_micros() as u64;

		let success = attempt.is_ok();

		self.peer.on_request_done(success, latency_micros).await;

		#[cfg(feature = "metrics")]
		self.record_metrics(success, started.elapsed()).await;

		attempt.map_err(Error::Net)
	}

	#[cfg(feature = "metrics")]
	async fn record_metrics(&self, success: bool, duration: Duration) {
		let app_id = self.peer.info().await.app_name;

		crate::metrics::record_request(&app_id, self.peer.instance_id(), success, duration);
	}

	/// Send a request to the pinned peer, reporting success to the health
	/// ladder for any response the peer produced itself (including a `4xx`
	/// one, since that still means the peer answered) and failure only for a
	/// network error or a `5xx`. Regardless of what the health ladder
	/// records, any non-`2xx` response — `4xx` included — is surfaced to the
	/// caller as a `BadStatus` error.
	pub async fn request_resp_data(
		&self,
		method: Method,
		path: &str,
		body: Option<Vec<u8>>,
	) -> Result<Bytes> {
		let endpoint = self.peer.endpoint().await;
		let client = self.peer.client().await;
		let started = Instant::now();
		let attempt = client::request(&client, method, &endpoint, path, body, ATTEMPT_TIMEOUT).await;
		let latency_micros = started.elapsed().as_micros() as u64;

		let success = !matches!(&attempt, Ok(exchange) if exchange.status.is_server_error())
			&& attempt.is_ok();

		self.peer.on_request_done(success, latency_micros).await;

		#[cfg(feature = "metrics")]
		self.record_metrics(success, started.elapsed()).await;

		match attempt {
			Ok(exchange) if exchange.is_success() => Ok(exchange.body),
			Ok(exchange) => Err(Error::BadStatus {
				status: exchange.status,
				endpoint,
				body: String::from_utf8(exchange.body.to_vec()).ok(),
			}),
			Err(err) => Err(Error::Net(err)),
		}
	}
}
impl Drop for Handle {
	fn drop(&mut self) {
		let peer = self.peer.clone();

		tokio::spawn(async move {
			peer.dec_in_flight().await;
		});
	}
}

/// Resolve a handle to any eligible instance of `app_id`, refreshing the
/// directory first if it has never been populated.
#[tracing::instrument(skip(refresher))]
pub async fn get_handle(refresher: &Refresher, app_id: &str) -> Result<Handle> {
	let directory = refresher.directory(app_id).await;

	if directory.order_len().await == 0 {
		refresher.refresh_app(app_id).await?;
	}

	if let Some(peer) = pick(&directory).await {
		return Ok(Handle::new(peer).await);
	}

	// Every candidate was ineligible, or the app vanished since it was last
	// populated; force one more refresh and try exactly once more.
	refresher.refresh_app(app_id).await?;

	match pick(&directory).await {
		Some(peer) => Ok(Handle::new(peer).await),
		None => Err(Error::NotRegistered { app: app_id.to_owned(), instance: None }),
	}
}

/// Resolve a handle to one specific instance, refreshing the directory first
/// if the instance is not yet known.
#[tracing::instrument(skip(refresher))]
pub async fn get_handle_for_instance(
	refresher: &Refresher,
	app_id: &str,
	ins_id: &str,
) -> Result<Handle> {
	let directory = refresher.directory(app_id).await;

	if let Some(peer) = directory.peer(ins_id).await {
		return Ok(Handle::new(peer).await);
	}

	refresher.refresh_app(app_id).await?;

	match directory.peer(ins_id).await {
		Some(peer) => Ok(Handle::new(peer).await),
		None => Err(Error::NotRegistered { app: app_id.to_owned(), instance: Some(ins_id.to_owned()) }),
	}
}

async fn pick(directory: &AppDirectory) -> Option<Arc<PeerInstance>> {
	let scanned = directory.scan_candidates().await;

	if scanned.is_empty() {
		return None;
	}

	let candidates: Vec<PeerCandidate> = scanned
		.iter()
		.map(|(peer, eligible)| PeerCandidate {
			instance_id: peer.instance_id().to_owned(),
			eligible: *eligible,
		})
		.collect();

	let chosen_index = match directory.choose_fn().await {
		Some(choose_fn) => choose_fn(&candidates),
		None => default_choose(&candidates),
	}?;

	directory.advance_cursor().await;

	scanned.get(chosen_index).map(|(peer, _)| peer.clone())
}
