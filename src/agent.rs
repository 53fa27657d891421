//! Top-level facade wiring the registry client, heartbeat manager, and
//! directory refresher into one handle, mirroring `EurekaAgent`'s role as the
//! single object an application embeds.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use reqwest::Method;
use url::Url;
// self
use crate::{
	_prelude::*,
	config::AgentConfig,
	directory::{Refresher, health::ErrorState},
	heartbeat::{HeartbeatManager, HeartbeatStatus},
	model::InstanceInfo,
	registry::{self, RegistryClient},
	selection::{self, Handle},
};

/// Point-in-time health projection for one peer, for status reporting and
/// diagnostics.
#[derive(Clone, Debug)]
pub struct PeerStatus {
	/// Instance id this status describes.
	pub instance_id: String,
	/// Endpoint currently targeted for this peer.
	pub endpoint: Url,
	/// Current cold-down ladder step.
	pub error_step: u8,
	/// Whether the peer is presently considered in the error regime.
	pub is_err: bool,
	/// Number of handles currently outstanding against this peer.
	pub in_flight: u32,
	/// All-time request count observed for this peer.
	pub request_count: u64,
}

/// Embeddable client-side service-discovery agent: registers itself,
/// maintains its own lease via heartbeats, and resolves other applications'
/// instances from a continuously refreshed local directory.
pub struct Agent {
	registry: Arc<RegistryClient>,
	heartbeat: Arc<HeartbeatManager>,
	refresher: Arc<Refresher>,
	stopped: AtomicBool,
}
impl Agent {
	/// Build a new agent from a validated configuration. Does not start any
	/// background tasks; call [`Agent::start`] once constructed.
	pub fn new(config: AgentConfig) -> Result<Self> {
		let client =
			crate::http::client::build_client_with_tls(config.max_conn_count, config.tls.as_ref())?;
		let registry =
			Arc::new(RegistryClient::new(client, config.endpoints.clone(), config.retry_fn.clone()));
		let pool = Arc::new(tokio::sync::Semaphore::new(config.worker_pool_size));
		let heartbeat = HeartbeatManager::new(registry.clone(), config.heartbeat_period, pool.clone());
		let refresher = Refresher::new(
			registry.clone(),
			config.default_conn_count,
			config.tls.clone(),
			config.refresh_period,
			pool,
		);

		Ok(Self { registry, heartbeat, refresher, stopped: AtomicBool::new(false) })
	}

	/// Start the background heartbeat and directory-refresh timer loops.
	pub fn start(&self) {
		self.heartbeat.start();
		self.refresher.start();
	}

	/// Stop both background timer loops. Safe to call more than once.
	///
	/// Every other public operation fails with [`Error::Stopped`] afterward;
	/// there is no way to restart a stopped agent.
	pub fn stop(&self) {
		self.stopped.store(true, Ordering::Release);
		self.heartbeat.stop();
		self.refresher.stop();
	}

	fn ensure_running(&self) -> Result<()> {
		if self.stopped.load(Ordering::Acquire) { Err(Error::Stopped) } else { Ok(()) }
	}

	/// Register a fully-described instance and begin sending heartbeats for it.
	pub async fn register(&self, instance: InstanceInfo) -> Result<()> {
		self.ensure_running()?;
		self.heartbeat.register(&instance).await
	}

	/// Build and register the default self-instance payload for `app_id`
	/// listening on `ip_addr:port`, matching `EurekaAgent::registerIns`'s
	/// convenience overload.
	pub async fn register_self(&self, app_id: &str, ip_addr: &str, port: u16) -> Result<String> {
		self.ensure_running()?;

		let ins_id = registry::make_instance_id(app_id, ip_addr, port);
		let instance = registry::empty_instance(app_id, &ins_id, port, ip_addr);

		self.heartbeat.register(&instance).await?;

		Ok(ins_id)
	}

	/// Unregister an instance and stop sending heartbeats for it.
	pub async fn unregister(&self, app_id: &str, ins_id: &str) -> Result<()> {
		self.ensure_running()?;
		self.heartbeat.unregister(app_id, ins_id).await
	}

	/// Mark a registered instance out of service.
	pub async fn status_out_of_service(&self, app_id: &str, ins_id: &str) -> Result<()> {
		self.ensure_running()?;
		self.registry.status_out_of_service(app_id, ins_id).await
	}

	/// Clear an out-of-service override, restoring `UP`.
	pub async fn status_up(&self, app_id: &str, ins_id: &str) -> Result<()> {
		self.ensure_running()?;
		self.registry.status_up(app_id, ins_id).await
	}

	/// Update one metadata key on a registered instance.
	pub async fn update_metadata(
		&self,
		app_id: &str,
		ins_id: &str,
		key: &str,
		value: &str,
	) -> Result<()> {
		self.ensure_running()?;
		self.registry.update_metadata(app_id, ins_id, key, value).await
	}

	/// Resolve a handle to any eligible instance of `app_id`.
	pub async fn get_handle(&self, app_id: &str) -> Result<Handle> {
		self.ensure_running()?;
		selection::get_handle(&self.refresher, app_id).await
	}

	/// Resolve a handle to one specific instance of `app_id`.
	pub async fn get_handle_for_instance(&self, app_id: &str, ins_id: &str) -> Result<Handle> {
		self.ensure_running()?;
		selection::get_handle_for_instance(&self.refresher, app_id, ins_id).await
	}

	/// Fetch the full current instance list of `app_id` directly, bypassing
	/// the local directory cache.
	pub async fn query_ins_by_app_id(&self, app_id: &str) -> Result<Vec<InstanceInfo>> {
		self.ensure_running()?;
		self.registry.query_ins_by_app_id(app_id).await
	}

	/// Fetch every application's instances directly from the registry.
	pub async fn query_ins_all(&self) -> Result<Vec<InstanceInfo>> {
		self.ensure_running()?;
		self.registry.query_ins_all().await
	}

	/// Fetch one instance by application and instance id directly.
	pub async fn query_ins_by_app_id_ins_id(
		&self,
		app_id: &str,
		ins_id: &str,
	) -> Result<InstanceInfo> {
		self.ensure_running()?;
		self.registry.query_ins_by_app_id_ins_id(app_id, ins_id).await
	}

	/// Fetch instances behind a virtual IP address directly.
	pub async fn query_ins_by_vip(&self, vip: &str) -> Result<Vec<InstanceInfo>> {
		self.ensure_running()?;
		self.registry.query_ins_by_vip(vip).await
	}

	/// Fetch instances behind a secure virtual IP address directly.
	pub async fn query_ins_by_svip(&self, svip: &str) -> Result<Vec<InstanceInfo>> {
		self.ensure_running()?;
		self.registry.query_ins_by_svip(svip).await
	}

	/// Install a custom selection policy for `app_id`.
	pub async fn set_choose_fn(&self, app_id: &str, choose_fn: crate::directory::entry::ChooseFn) {
		self.refresher.directory(app_id).await.set_choose_fn(choose_fn).await;
	}

	/// Point-in-time lease-renewal bookkeeping for one self-registered
	/// instance, if it is still registered.
	pub async fn heartbeat_status(&self, ins_id: &str) -> Option<HeartbeatStatus> {
		self.heartbeat.status(ins_id).await
	}

	/// Point-in-time health status for one cached peer, if the directory
	/// currently knows about it.
	pub async fn peer_status(&self, app_id: &str, ins_id: &str) -> Option<PeerStatus> {
		let directory = self.refresher.directory(app_id).await;
		let peer = directory.peer(ins_id).await?;
		let (error, latency): (ErrorState, _) = peer.health_snapshot().await;

		Some(PeerStatus {
			instance_id: peer.instance_id().to_owned(),
			endpoint: peer.endpoint().await,
			error_step: error.step(),
			is_err: error.is_err(),
			in_flight: error.in_flight(),
			request_count: latency.request_count_all(),
		})
	}
}

/// Re-exported so callers building a request don't need a direct `reqwest` dependency.
pub use Method as HttpMethod;
