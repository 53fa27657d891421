//! Directory refresher: periodically reconciles every watched application's
//! instance list against the registry.
//!
//! Grounded on `eureka_agent.cpp`'s `refreshThread`/`refreshCheckApp`: a
//! single-flight guard plus a spawned timer loop, here reconciling one peer
//! list per watched application instead of one cached document per key.

pub mod entry;
pub mod health;

// std
use std::collections::HashMap;
// crates.io
use tokio::sync::{RwLock, Semaphore};
// self
use crate::{_prelude::*, config::TlsConfig, directory::entry::AppDirectory, registry::RegistryClient};

/// Owns one [`AppDirectory`] per watched application and the background task
/// that keeps them reconciled against the registry.
pub struct Refresher {
	registry: Arc<RegistryClient>,
	apps: RwLock<HashMap<String, Arc<AppDirectory>>>,
	default_conn_count: usize,
	tls: Option<TlsConfig>,
	period: Duration,
	pool: Arc<Semaphore>,
	handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}
impl Refresher {
	pub(crate) fn new(
		registry: Arc<RegistryClient>,
		default_conn_count: usize,
		tls: Option<TlsConfig>,
		period: Duration,
		pool: Arc<Semaphore>,
	) -> Arc<Self> {
		Arc::new(Self {
			registry,
			apps: RwLock::new(HashMap::new()),
			default_conn_count,
			tls,
			period,
			pool,
			handle: std::sync::Mutex::new(None),
		})
	}

	/// Directory for `app_id`, creating an empty one (populated by the next
	/// refresh tick, or immediately via [`refresh_app`](Self::refresh_app))
	/// if this is the first time it's been watched.
	pub async fn directory(&self, app_id: &str) -> Arc<AppDirectory> {
		if let Some(existing) = self.apps.read().await.get(app_id) {
			return existing.clone();
		}

		let mut apps = self.apps.write().await;

		apps.entry(app_id.to_owned()).or_insert_with(|| AppDirectory::new(app_id)).clone()
	}

	/// Reconcile one application immediately, bypassing the timer cadence.
	///
	/// Used by [`selection::get_handle`](crate::selection::get_handle) when an
	/// app is requested that has never been refreshed. Returns `Ok(())` even
	/// when the registry reports the app as absent (reconciled against an
	/// empty instance list), matching `refreshCheckApp`'s "app vanished"
	/// handling.
	#[tracing::instrument(skip(self))]
	pub async fn refresh_app(&self, app_id: &str) -> Result<()> {
		let directory = self.directory(app_id).await;

		if !directory.try_begin_refresh() {
			return Ok(());
		}

		let result = self.do_refresh(&directory).await;

		directory.end_refresh();
		result
	}

	async fn do_refresh(&self, directory: &AppDirectory) -> Result<()> {
		let queried = self.registry.query_ins_by_app_id(directory.app_id()).await;

		#[cfg(feature = "metrics")]
		crate::metrics::record_refresh(directory.app_id(), queried.is_ok());

		let instances = match queried {
			Ok(instances) => instances,
			Err(Error::NotFound) => Vec::new(),
			Err(err) => return Err(err),
		};

		directory.reconcile(instances, self.default_conn_count, self.tls.as_ref()).await?;

		Ok(())
	}

	/// Start the background refresh-and-health timer loop.
	pub fn start(self: &Arc<Self>) {
		let refresher = self.clone();
		let mut handle_slot = self.handle.lock().expect("refresher handle mutex poisoned");

		if handle_slot.is_some() {
			return;
		}

		*handle_slot = Some(tokio::spawn(async move {
			let mut ticker = tokio::time::interval(refresher.period);

			loop {
				ticker.tick().await;
				refresher.tick().await;
			}
		}));
	}

	/// Stop the background timer loop, if running.
	pub fn stop(&self) {
		if let Some(handle) = self.handle.lock().expect("refresher handle mutex poisoned").take() {
			handle.abort();
		}
	}

	#[tracing::instrument(skip(self))]
	async fn tick(self: &Arc<Self>) {
		let directories: Vec<_> = self.apps.read().await.values().cloned().collect();
		let mut jobs = Vec::with_capacity(directories.len());

		for directory in &directories {
			let Ok(permit) = self.pool.clone().acquire_owned().await else { continue };
			let refresher = self.clone();
			let directory = directory.clone();

			jobs.push(tokio::spawn(async move {
				let _permit = permit;

				if let Err(err) = refresher.refresh_app(directory.app_id()).await {
					tracing::warn!(app = directory.app_id(), error = %err, "directory refresh failed");
				}
			}));
		}

		for job in jobs {
			let _ = job.await;
		}

		for directory in &directories {
			let ticked = directory.next_check_all().await;

			#[cfg(feature = "metrics")]
			for peer in &ticked {
				let (error, _) = peer.health_snapshot().await;

				crate::metrics::record_peer_step(directory.app_id(), peer.instance_id(), error.step());
			}
			#[cfg(not(feature = "metrics"))]
			let _ = ticked;
		}
	}
}
