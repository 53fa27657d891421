//! Heartbeat manager: keeps self-registered instances' leases alive.
//!
//! Grounded on `eureka_agent.cpp`'s `heartBeatThread`/`doHeartBeat`: one timer
//! task scans every registered instance on a fixed cadence and spawns a
//! worker job per instance whose own lease-derived cadence has elapsed,
//! guarded per-instance so a slow heartbeat never overlaps its own retry.
//! Worker jobs are bounded by a shared [`Semaphore`] sized from
//! `AgentConfig::worker_pool_size`, mirroring the original's fixed-size
//! heartbeat thread pool.

// std
use std::{
	collections::HashMap,
	sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
// crates.io
use tokio::sync::{RwLock, Semaphore};
// self
use crate::{_prelude::*, model::InstanceInfo, registry::RegistryClient};

/// Heartbeats fire at least this often regardless of a short lease renewal interval.
const MIN_CADENCE_SECS: u64 = 10;

fn cadence(renewal_interval_in_secs: u32) -> Duration {
	Duration::from_secs((renewal_interval_in_secs as u64 / 3 + 1).max(MIN_CADENCE_SECS))
}

/// Point-in-time view of one self-registered instance's heartbeat bookkeeping.
#[derive(Clone, Debug)]
pub struct HeartbeatStatus {
	/// The instance snapshot this record was registered with.
	pub info: InstanceInfo,
	/// Cumulative count of successful lease renewals.
	pub success_count: u64,
	/// Cumulative count of failed lease renewals.
	pub error_count: u64,
	/// Time of the last renewal attempt, if any has been made yet.
	pub last_heartbeat: Option<Instant>,
}

struct HeartbeatRecord {
	info: InstanceInfo,
	cadence: Duration,
	last_sent: std::sync::Mutex<Option<Instant>>,
	doing: AtomicBool,
	success_count: AtomicU64,
	error_count: AtomicU64,
}
impl HeartbeatRecord {
	fn app_id(&self) -> &str {
		&self.info.app_name
	}

	fn ins_id(&self) -> &str {
		&self.info.instance_id
	}
}

/// Owns the set of self-registered instances and the background task that
/// renews their leases.
pub struct HeartbeatManager {
	registry: Arc<RegistryClient>,
	records: RwLock<HashMap<String, Arc<HeartbeatRecord>>>,
	period: Duration,
	pool: Arc<Semaphore>,
	handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}
impl HeartbeatManager {
	pub(crate) fn new(registry: Arc<RegistryClient>, period: Duration, pool: Arc<Semaphore>) -> Arc<Self> {
		Arc::new(Self {
			registry,
			records: RwLock::new(HashMap::new()),
			period,
			pool,
			handle: std::sync::Mutex::new(None),
		})
	}

	/// Register an instance with the upstream registry and begin sending
	/// heartbeats for it, firing the first one immediately.
	#[tracing::instrument(skip(self, instance), fields(app = %instance.app_name, instance = %instance.instance_id))]
	pub async fn register(&self, instance: &InstanceInfo) -> Result<()> {
		self.registry.register(instance).await?;

		let record = Arc::new(HeartbeatRecord {
			info: instance.clone(),
			cadence: cadence(instance.lease_info.renewal_interval_in_secs),
			last_sent: std::sync::Mutex::new(None),
			doing: AtomicBool::new(false),
			success_count: AtomicU64::new(0),
			error_count: AtomicU64::new(0),
		});

		self.records.write().await.insert(instance.instance_id.clone(), record.clone());

		self.send(record).await;

		Ok(())
	}

	/// Remove an instance from the registry and stop sending heartbeats for it.
	#[tracing::instrument(skip(self))]
	pub async fn unregister(&self, app_id: &str, ins_id: &str) -> Result<()> {
		self.registry.unregister(app_id, ins_id).await?;
		self.records.write().await.remove(ins_id);

		Ok(())
	}

	/// Point-in-time bookkeeping snapshot for one self-registered instance, if
	/// it is still registered.
	pub async fn status(&self, ins_id: &str) -> Option<HeartbeatStatus> {
		let record = self.records.read().await.get(ins_id)?.clone();

		Some(HeartbeatStatus {
			info: record.info.clone(),
			success_count: record.success_count.load(Ordering::Relaxed),
			error_count: record.error_count.load(Ordering::Relaxed),
			last_heartbeat: *record.last_sent.lock().expect("last_sent mutex poisoned"),
		})
	}

	/// Start the background heartbeat-scanning timer loop.
	pub fn start(self: &Arc<Self>) {
		let manager = self.clone();
		let mut handle_slot = self.handle.lock().expect("heartbeat handle mutex poisoned");

		if handle_slot.is_some() {
			return;
		}

		*handle_slot = Some(tokio::spawn(async move {
			let mut ticker = tokio::time::interval(manager.period);

			loop {
				ticker.tick().await;
				manager.tick().await;
			}
		}));
	}

	/// Stop the background timer loop, if running.
	pub fn stop(&self) {
		if let Some(handle) = self.handle.lock().expect("heartbeat handle mutex poisoned").take() {
			handle.abort();
		}
	}

	async fn tick(&self) {
		let records: Vec<_> = self.records.read().await.values().cloned().collect();
		let now = Instant::now();

		for record in records {
			let due = {
				let last_sent = record.last_sent.lock().expect("last_sent mutex poisoned");

				last_sent.is_none_or(|t| now.saturating_duration_since(t) >= record.cadence)
			};

			if due {
				let Ok(permit) = self.pool.clone().acquire_owned().await else { continue };
				let manager_registry = self.registry.clone();
				let record = record.clone();

				tokio::spawn(async move {
					let _permit = permit;

					send_heartbeat(manager_registry, record).await;
				});
			}
		}
	}

	async fn send(&self, record: Arc<HeartbeatRecord>) {
		send_heartbeat(self.registry.clone(), record).await;
	}
}

async fn send_heartbeat(registry: Arc<RegistryClient>, record: Arc<HeartbeatRecord>) {
	if record.doing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
		return;
	}

	let result = registry.heartbeat(record.app_id(), record.ins_id()).await;

	*record.last_sent.lock().expect("last_sent mutex poisoned") = Some(Instant::now());
	record.doing.store(false, Ordering::Release);

	match &result {
		Ok(()) => record.success_count.fetch_add(1, Ordering::Relaxed),
		Err(_) => record.error_count.fetch_add(1, Ordering::Relaxed),
	};

	#[cfg(feature = "metrics")]
	crate::metrics::record_heartbeat(record.app_id(), record.ins_id(), result.is_ok());

	if let Err(err) = result {
		tracing::warn!(app = %record.app_id(), instance = %record.ins_id(), error = %err, "heartbeat failed");
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn cadence_floors_at_the_minimum_regardless_of_a_short_renewal_interval() {
		assert_eq!(cadence(3), Duration::from_secs(MIN_CADENCE_SECS));
		assert_eq!(cadence(60), Duration::from_secs(21));
	}
}
