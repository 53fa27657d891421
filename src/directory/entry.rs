//! [`AppDirectory`] and [`PeerInstance`]: the per-application instance cache the
//! refresher reconciles and selection reads from.
//!
//! Grounded on `eureka_agent.h`'s `CheckAppData`/`CheckInsData` for the field
//! set: a peer *list* guarded by one directory lock, with each peer
//! additionally holding its own mutex so a live [`Handle`] can keep mutating
//! health counters after the refresher evicts it from the map (reference-shared
//! ownership; handles never dereference back through the map).

// std
use std::{
	collections::HashMap,
	sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
// crates.io
use rand::{SeedableRng, rngs::SmallRng, seq::SliceRandom};
use reqwest::Client;
use tokio::sync::{Mutex, RwLock};
use url::Url;
// self
use crate::{
	_prelude::*,
	config::TlsConfig,
	directory::health::{ErrorState, LatencyStats},
	model::InstanceInfo,
};

/// Derive a peer's base endpoint from its advertised ports.
///
/// Prefers the plain port when enabled, falls back to the secure port, and
/// otherwise targets the host on the default HTTP port (`eureka_agent.cpp`'s
/// `getEndpoint`).
pub fn derive_endpoint(info: &InstanceInfo) -> Result<Url> {
	let raw = if info.port.enabled {
		format!("http://{}:{}", info.ip_addr, info.port.number)
	} else if info.secure_port.enabled {
		format!("https://{}:{}", info.ip_addr, info.secure_port.number)
	} else {
		format!("http://{}", info.ip_addr)
	};

	Url::parse(&raw).map_err(|err| Error::Param {
		field: "ip_addr",
		reason: format!("cannot derive endpoint from '{}': {err}", info.ip_addr),
	})
}

/// One peer instance within an [`AppDirectory`], shared by every outstanding
/// [`Handle`](crate::selection::Handle) constructed against it even after the
/// refresher removes it from the directory's visible set.
#[derive(Debug)]
pub struct PeerInstance {
	instance_id: String,
	state: Mutex<PeerState>,
}
#[derive(Debug)]
struct PeerState {
	info: InstanceInfo,
	endpoint: Url,
	client: Client,
	latency: LatencyStats,
	error: ErrorState,
	deleted: bool,
}
impl PeerInstance {
	pub(crate) fn new(info: InstanceInfo, endpoint: Url, client: Client) -> Arc<Self> {
		let instance_id = info.instance_id.clone();

		Arc::new(Self {
			instance_id,
			state: Mutex::new(PeerState {
				info,
				endpoint,
				client,
				latency: LatencyStats::default(),
				error: ErrorState::default(),
				deleted: false,
			}),
		})
	}

	/// Stable instance identifier this peer was registered under.
	pub fn instance_id(&self) -> &str {
		&self.instance_id
	}

	/// Snapshot of the instance metadata currently published for this peer.
	pub async fn info(&self) -> InstanceInfo {
		self.state.lock().await.info.clone()
	}

	/// Endpoint the peer's transport client currently targets.
	pub async fn endpoint(&self) -> Url {
		self.state.lock().await.endpoint.clone()
	}

	/// Client to use for a request against this peer.
	pub async fn client(&self) -> Client {
		self.state.lock().await.client.clone()
	}

	/// Whether the refresher has evicted this peer from its app's directory.
	pub async fn is_deleted(&self) -> bool {
		self.state.lock().await.deleted
	}

	pub(crate) async fn mark_deleted(&self) {
		self.state.lock().await.deleted = true;
	}

	/// Replace the published instance info; if the derived endpoint changed,
	/// retarget the transport and reset the error ladder.
	pub(crate) async fn update(
		&self,
		info: InstanceInfo,
		max_conn_count: usize,
		tls: Option<&TlsConfig>,
	) -> Result<bool> {
		let new_endpoint = derive_endpoint(&info)?;
		let mut state = self.state.lock().await;
		let endpoint_changed = new_endpoint != state.endpoint;

		if endpoint_changed {
			state.client = crate::http::client::build_client_with_tls(max_conn_count, tls)?;
			state.endpoint = new_endpoint;
			state.error.reset();
		}

		state.info = info;

		Ok(endpoint_changed)
	}

	/// Eligibility predicate used by selection.
	pub async fn try_choose(&self) -> bool {
		self.state.lock().await.error.try_choose()
	}

	pub(crate) async fn inc_in_flight(&self) {
		self.state.lock().await.error.inc_in_flight();
	}

	pub(crate) async fn dec_in_flight(&self) {
		self.state.lock().await.error.dec_in_flight();
	}

	/// Record one request's outcome against both the latency and error ladders.
	pub async fn on_request_done(&self, success: bool, latency_micros: u64) {
		let mut state = self.state.lock().await;

		state.latency.record(success, latency_micros);
		state.error.on_request_done(success);
	}

	/// Advance latency buckets and the error-state ladder by one check tick.
	pub(crate) async fn next_check(&self) {
		let mut state = self.state.lock().await;

		state.latency.next_check();
		state.error.next_check();
	}

	/// Point-in-time health snapshot for status reporting.
	pub async fn health_snapshot(&self) -> (ErrorState, LatencyStats) {
		let state = self.state.lock().await;

		(state.error.clone(), state.latency.clone())
	}
}

/// One scan candidate handed to a pluggable [`ChooseFn`]: an instance id paired
/// with its current `try_choose()` eligibility.
#[derive(Clone, Debug)]
pub struct PeerCandidate {
	/// Instance identifier.
	pub instance_id: String,
	/// Whether [`PeerInstance::try_choose`] currently permits selecting this peer.
	pub eligible: bool,
}

/// A custom selection policy: given the app's candidates (in scan order
/// starting at the current cursor) and asked to pick one, returns the index
/// into `candidates` to select, or `None` to decline all of them.
///
/// Plugs in at the same seam as the reference client's
/// `ChooseHttpClientFunction`, simplified from an async callback taking the
/// app lock to a pure function over a consistent snapshot; the directory
/// lock is held for the snapshot's duration by the caller, matching the
/// original's "lock passed through" contract without requiring `async`
/// trait objects.
pub type ChooseFn = Arc<dyn Fn(&[PeerCandidate]) -> Option<usize> + Send + Sync>;

#[derive(Default)]
struct DirectoryState {
	peers: HashMap<String, Arc<PeerInstance>>,
	order: Vec<String>,
	choose_fn: Option<ChooseFn>,
}

/// The agent's local cache of instances for one application, periodically
/// refreshed by the [`Refresher`](crate::directory::Refresher).
pub struct AppDirectory {
	app_id: String,
	state: RwLock<DirectoryState>,
	cursor: AtomicUsize,
	last_refresh: std::sync::Mutex<Option<Instant>>,
	doing: AtomicBool,
	rng: Mutex<SmallRng>,
}
impl AppDirectory {
	pub(crate) fn new(app_id: impl Into<String>) -> Arc<Self> {
		Arc::new(Self {
			app_id: app_id.into(),
			state: RwLock::new(DirectoryState::default()),
			cursor: AtomicUsize::new(0),
			last_refresh: std::sync::Mutex::new(None),
			doing: AtomicBool::new(false),
			rng: Mutex::new(SmallRng::from_rng(&mut rand::rng())),
		})
	}

	/// Application id this directory caches instances for.
	pub fn app_id(&self) -> &str {
		&self.app_id
	}

	/// Attempt to claim the single-flight refresh guard; `false` if a refresh
	/// is already in progress for this app.
	pub(crate) fn try_begin_refresh(&self) -> bool {
		self.doing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
	}

	pub(crate) fn end_refresh(&self) {
		self.doing.store(false, Ordering::Release);
	}

	/// Timestamp of the last successful refresh, if any.
	pub fn last_refresh(&self) -> Option<Instant> {
		*self.last_refresh.lock().expect("last_refresh mutex poisoned")
	}

	/// Look up one peer by instance id.
	pub async fn peer(&self, instance_id: &str) -> Option<Arc<PeerInstance>> {
		self.state.read().await.peers.get(instance_id).cloned()
	}

	/// Number of peers currently visible in the selection order.
	pub async fn order_len(&self) -> usize {
		self.state.read().await.order.len()
	}

	/// Install a custom selection policy for this app.
	pub async fn set_choose_fn(&self, f: ChooseFn) {
		self.state.write().await.choose_fn = Some(f);
	}

	/// Currently installed custom selection policy, if any.
	pub async fn choose_fn(&self) -> Option<ChooseFn> {
		self.state.read().await.choose_fn.clone()
	}

	/// Snapshot candidates in scan order starting at the current cursor,
	/// alongside their `try_choose()` eligibility, and the peer instances
	/// indexed the same way so a caller can construct a handle without a
	/// second lookup.
	pub async fn scan_candidates(&self) -> Vec<(Arc<PeerInstance>, bool)> {
		let (order, peers) = {
			let state = self.state.read().await;

			(state.order.clone(), state.peers.clone())
		};

		if order.is_empty() {
			return Vec::new();
		}

		let n = order.len();
		let start = self.cursor.load(Ordering::Acquire) % n;
		let mut out = Vec::with_capacity(n);

		for i in 0..n {
			let id = &order[(start + i) % n];

			if let Some(peer) = peers.get(id) {
				let eligible = peer.try_choose().await;

				out.push((peer.clone(), eligible));
			}
		}

		out
	}

	/// Advance the round-robin cursor by one, wrapping on the current order
	/// length. Called when a handle is constructed via the default selector,
	/// so the cursor moves on selection and not only on refresh.
	pub async fn advance_cursor(&self) {
		let len = self.state.read().await.order.len();

		if len == 0 {
			return;
		}

		self.cursor.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len)).ok();
	}

	/// Advance every peer's latency/error ladder by one check tick, returning
	/// the ticked peers so callers can publish post-tick telemetry without a
	/// second lock round-trip.
	pub(crate) async fn next_check_all(&self) -> Vec<Arc<PeerInstance>> {
		let peers: Vec<_> = self.state.read().await.peers.values().cloned().collect();

		for peer in &peers {
			peer.next_check().await;
		}

		peers
	}

	/// Reconcile this directory against a freshly queried instance list,
	/// mirroring `refreshCheckApp`'s critical section.
	///
	/// Returns the peers evicted by this refresh so the caller can drop them
	/// outside the lock (`eureka_agent.cpp` stops their transport client
	/// there; in this crate dropping the last `Arc` is sufficient since
	/// `reqwest::Client` tears its pool down on drop).
	pub(crate) async fn reconcile(
		&self,
		queried: Vec<InstanceInfo>,
		default_conn_count: usize,
		tls: Option<&TlsConfig>,
	) -> Result<Vec<Arc<PeerInstance>>> {
		let mut state = self.state.write().await;
		let mut erase: HashMap<String, Arc<PeerInstance>> = state.peers.clone();
		let prev_next_id = if state.order.is_empty() {
			None
		} else {
			let cursor = self.cursor.load(Ordering::Acquire) % state.order.len();

			Some(state.order[cursor].clone())
		};
		let mut changed = false;

		for q in queried {
			if let Some(existing) = erase.remove(&q.instance_id) {
				existing.update(q, default_conn_count, tls).await?;
				state.peers.insert(existing.instance_id().to_owned(), existing);
			} else {
				changed = true;

				let endpoint = derive_endpoint(&q)?;
				let client = crate::http::client::build_client_with_tls(default_conn_count, tls)?;
				let peer = PeerInstance::new(q, endpoint, client);

				state.peers.insert(peer.instance_id().to_owned(), peer);
			}
		}

		if !erase.is_empty() {
			changed = true;
		}

		if changed {
			state.order = state.peers.keys().cloned().collect();

			let mut rng = self.rng.lock().await;

			state.order.shuffle(&mut *rng);

			let next_index = prev_next_id
				.as_ref()
				.and_then(|id| state.order.iter().position(|candidate| candidate == id))
				.unwrap_or(0);

			self.cursor.store(next_index, Ordering::Release);
		}

		for id in erase.keys() {
			state.peers.remove(id);
		}

		*self.last_refresh.lock().expect("last_refresh mutex poisoned") = Some(Instant::now());

		for peer in erase.values() {
			peer.mark_deleted().await;
		}

		Ok(erase.into_values().collect())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::model::{DataCenterInfo, LeaseInfo, Port};

	fn instance(id: &str, port: u16) -> InstanceInfo {
		InstanceInfo {
			instance_id: id.to_owned(),
			app_name: "MY-APP".into(),
			host_name: "10.0.0.1".into(),
			home_page_url: String::new(),
			status_page_url: String::new(),
			health_check_url: String::new(),
			ip_addr: "10.0.0.1".into(),
			vip_address: "my-app".into(),
			secure_vip_address: None,
			port: Port { number: port, enabled: true },
			secure_port: Port { number: 443, enabled: false },
			status: crate::model::InstanceStatus::Up,
			overridden_status: None,
			lease_info: LeaseInfo::default(),
			data_center_info: DataCenterInfo::default(),
			metadata: Default::default(),
			is_coordinating_discovery_server: false,
			last_updated_timestamp: None,
			last_dirty_timestamp: None,
			action_type: None,
			country_id: 0,
		}
	}

	#[test]
	fn endpoint_prefers_plain_port_over_secure() {
		let mut info = instance("a", 8080);

		info.secure_port = Port { number: 8443, enabled: true };

		assert_eq!(derive_endpoint(&info).unwrap().as_str(), "http://10.0.0.1:8080/");
	}

	#[test]
	fn endpoint_falls_back_to_secure_port() {
		let mut info = instance("a", 8080);

		info.port.enabled = false;
		info.secure_port = Port { number: 8443, enabled: true };

		assert_eq!(derive_endpoint(&info).unwrap().as_str(), "https://10.0.0.1:8443/");
	}

	#[test]
	fn endpoint_falls_back_to_default_http_port() {
		let mut info = instance("a", 8080);

		info.port.enabled = false;

		assert_eq!(derive_endpoint(&info).unwrap().as_str(), "http://10.0.0.1/");
	}

	#[tokio::test]
	async fn reconcile_adds_and_removes_peers() {
		let directory = AppDirectory::new("MY-APP");

		directory.reconcile(vec![instance("a", 8080), instance("b", 8081)], 3, None).await.unwrap();

		assert_eq!(directory.order_len().await, 2);
		assert!(directory.peer("a").await.is_some());

		let removed = directory.reconcile(vec![instance("a", 8080)], 3, None).await.unwrap();

		assert_eq!(removed.len(), 1);
		assert_eq!(removed[0].instance_id(), "b");
		assert_eq!(directory.order_len().await, 1);
		assert!(directory.peer("b").await.is_none());
		assert!(removed[0].is_deleted().await);
	}

	#[tokio::test]
	async fn reconcile_retargets_endpoint_and_resets_error_state_on_port_change() {
		let directory = AppDirectory::new("MY-APP");

		directory.reconcile(vec![instance("a", 8080)], 3, None).await.unwrap();

		let peer = directory.peer("a").await.unwrap();

		peer.on_request_done(false, 10).await;

		directory.reconcile(vec![instance("a", 8090)], 3, None).await.unwrap();

		assert_eq!(peer.endpoint().await.as_str(), "http://10.0.0.1:8090/");

		let (error, _) = peer.health_snapshot().await;

		assert_eq!(error.step(), 0);
	}
}
