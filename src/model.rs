//! Semantic data model for registry entities, independent of wire encoding.

// self
use crate::_prelude::*;

/// Default renewal interval advertised by a lease, in seconds.
pub const DEFAULT_RENEWAL_INTERVAL_SECS: u32 = 30;
/// Default lease duration, in seconds.
pub const DEFAULT_LEASE_DURATION_SECS: u32 = 90;

/// A network port, paired with an enabled flag as Eureka encodes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Port {
	/// Port number.
	pub number: u16,
	/// Whether the port is enabled.
	pub enabled: bool,
}

/// Lease renewal configuration and bookkeeping for an instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseInfo {
	/// Seconds between heartbeat renewals.
	pub renewal_interval_in_secs: u32,
	/// Seconds the server holds a lease before eviction.
	pub duration_in_secs: u32,
	/// When the server first accepted this lease, if known.
	pub registration_timestamp: Option<DateTime<Utc>>,
	/// When the server last recorded a successful renewal, if known.
	pub last_renewal_timestamp: Option<DateTime<Utc>>,
	/// When the server evicted the lease, if it has been.
	pub eviction_timestamp: Option<DateTime<Utc>>,
	/// When the instance first reported itself as `UP`, if known.
	pub service_up_timestamp: Option<DateTime<Utc>>,
}
impl Default for LeaseInfo {
	fn default() -> Self {
		Self {
			renewal_interval_in_secs: DEFAULT_RENEWAL_INTERVAL_SECS,
			duration_in_secs: DEFAULT_LEASE_DURATION_SECS,
			registration_timestamp: None,
			last_renewal_timestamp: None,
			eviction_timestamp: None,
			service_up_timestamp: None,
		}
	}
}

/// Data center placement metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataCenterInfo {
	/// Data center name, e.g. "MyOwn".
	pub name: String,
	/// Fully-qualified implementation class name Eureka expects on the wire.
	pub class_name: String,
}
impl Default for DataCenterInfo {
	fn default() -> Self {
		Self {
			name: "MyOwn".to_owned(),
			class_name: "com.netflix.appinfo.MyDataCenterInfo".to_owned(),
		}
	}
}

/// Lifecycle status of a registered instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceStatus {
	/// Serving traffic.
	Up,
	/// Registered but not yet serving.
	Starting,
	/// Deliberately removed from rotation.
	OutOfService,
	/// Server could not determine status.
	Unknown,
	/// Instance has been removed.
	Down,
}
impl Default for InstanceStatus {
	fn default() -> Self {
		Self::Up
	}
}

/// A single service instance as registered with (or discovered from) the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceInfo {
	/// Unique instance identifier.
	pub instance_id: String,
	/// Application name the instance belongs to.
	pub app_name: String,
	/// Host name or address other instances should use to reach it.
	pub host_name: String,
	/// IP address of the instance.
	pub ip_addr: String,
	/// Home page URL, as published by the instance.
	pub home_page_url: String,
	/// Status page URL, as published by the instance.
	pub status_page_url: String,
	/// Health check URL, as published by the instance.
	pub health_check_url: String,
	/// Virtual IP address used for application-level lookups.
	pub vip_address: String,
	/// Secure virtual IP address used for HTTPS lookups.
	pub secure_vip_address: Option<String>,
	/// Plain HTTP port.
	pub port: Port,
	/// HTTPS port.
	pub secure_port: Port,
	/// Current lifecycle status.
	pub status: InstanceStatus,
	/// Status override requested out-of-band, if any.
	pub overridden_status: Option<InstanceStatus>,
	/// Lease renewal configuration.
	pub lease_info: LeaseInfo,
	/// Data center placement metadata.
	pub data_center_info: DataCenterInfo,
	/// Free-form metadata published by the instance.
	pub metadata: std::collections::BTreeMap<String, String>,
	/// Whether this instance coordinates discovery for its zone.
	pub is_coordinating_discovery_server: bool,
	/// Last time the server observed a heartbeat or update, if known.
	pub last_updated_timestamp: Option<DateTime<Utc>>,
	/// Opaque registry-assigned version counter, used to detect change.
	pub last_dirty_timestamp: Option<DateTime<Utc>>,
	/// Server-assigned change kind (`ADDED`/`MODIFIED`/`DELETED`) from an
	/// incremental delta; absent on a full fetch.
	pub action_type: Option<String>,
	/// Country code, as published by the instance.
	pub country_id: i64,
}
impl InstanceInfo {
	/// Construct the placeholder instance the registry client falls back to
	/// when a lookup cannot be satisfied but a caller requires a value rather
	/// than an error (mirrors the upstream client's permissive default).
	pub fn empty(app_name: impl Into<String>) -> Self {
		Self {
			instance_id: String::new(),
			app_name: app_name.into(),
			host_name: String::new(),
			ip_addr: String::new(),
			home_page_url: String::new(),
			status_page_url: String::new(),
			health_check_url: String::new(),
			vip_address: String::new(),
			secure_vip_address: None,
			port: Port { number: 0, enabled: false },
			secure_port: Port { number: 0, enabled: false },
			status: InstanceStatus::Down,
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

	/// Effective status, honoring a server-side override when present.
	pub fn effective_status(&self) -> InstanceStatus {
		self.overridden_status.unwrap_or(self.status)
	}

	/// Whether the instance should be considered eligible to serve traffic.
	pub fn is_up(&self) -> bool {
		matches!(self.effective_status(), InstanceStatus::Up)
	}
}

/// A named application and its member instances, as returned by the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Application {
	/// Application name.
	pub name: String,
	/// Member instances.
	pub instances: Vec<InstanceInfo>,
}

/// The full set of applications known to the registry at a point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Applications {
	/// Opaque delta version, used by incremental-fetch clients (unused here
	/// since this agent always performs full fetches, but retained for wire
	/// fidelity).
	pub versions_delta: Option<String>,
	/// Opaque hash code summarizing instance counts by status.
	pub apps_hashcode: Option<String>,
	/// Applications, keyed implicitly by `Application::name`.
	pub applications: Vec<Application>,
}
impl Applications {
	/// Look up an application by name.
	pub fn find(&self, app_name: &str) -> Option<&Application> {
		self.applications.iter().find(|app| app.name.eq_ignore_ascii_case(app_name))
	}
}
