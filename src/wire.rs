//! Eureka JSON wire shapes and conversions to/from [`crate::model`] types.
//!
//! Field names and nesting here follow the Eureka v2 REST contract exactly
//! (including its XML-derived `$`/`@attr` conventions), which is why they
//! diverge from the idiomatic names used in [`crate::model`].

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	model::{
		Application, Applications, DataCenterInfo, InstanceInfo, InstanceStatus, LeaseInfo, Port,
	},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PortWire {
	#[serde(rename = "$")]
	number: u16,
	#[serde(rename = "@enabled")]
	enabled: bool,
}
impl From<Port> for PortWire {
	fn from(value: Port) -> Self {
		Self { number: value.number, enabled: value.enabled }
	}
}
impl From<PortWire> for Port {
	fn from(value: PortWire) -> Self {
		Self { number: value.number, enabled: value.enabled }
	}
}

/// Eureka encodes timestamps as `time_t * 1000 + millis` integers, not
/// RFC3339 strings; `0` round-trips to `None` in both directions.
mod millis_timestamp {
	use chrono::{DateTime, TimeZone, Utc};
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(
		value: &Option<DateTime<Utc>>,
		serializer: S,
	) -> Result<S::Ok, S::Error> {
		serializer.serialize_i64(value.map_or(0, |dt| dt.timestamp_millis()))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<Option<DateTime<Utc>>, D::Error> {
		let millis = i64::deserialize(deserializer)?;

		if millis == 0 { Ok(None) } else { Ok(Utc.timestamp_millis_opt(millis).single()) }
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DataCenterInfoWire {
	name: String,
	#[serde(rename = "@class")]
	class_name: String,
}
impl From<DataCenterInfo> for DataCenterInfoWire {
	fn from(value: DataCenterInfo) -> Self {
		Self { name: value.name, class_name: value.class_name }
	}
}
impl From<DataCenterInfoWire> for DataCenterInfo {
	fn from(value: DataCenterInfoWire) -> Self {
		Self { name: value.name, class_name: value.class_name }
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LeaseInfoWire {
	#[serde(rename = "renewalIntervalInSecs")]
	renewal_interval_in_secs: u32,
	#[serde(rename = "durationInSecs")]
	duration_in_secs: u32,
	#[serde(default, rename = "registrationTimestamp", with = "millis_timestamp")]
	registration_timestamp: Option<DateTime<Utc>>,
	#[serde(default, rename = "lastRenewalTimestamp", with = "millis_timestamp")]
	last_renewal_timestamp: Option<DateTime<Utc>>,
	#[serde(default, rename = "evictionTimestamp", with = "millis_timestamp")]
	eviction_timestamp: Option<DateTime<Utc>>,
	#[serde(default, rename = "serviceUpTimestamp", with = "millis_timestamp")]
	service_up_timestamp: Option<DateTime<Utc>>,
}
impl From<LeaseInfo> for LeaseInfoWire {
	fn from(value: LeaseInfo) -> Self {
		Self {
			renewal_interval_in_secs: value.renewal_interval_in_secs,
			duration_in_secs: value.duration_in_secs,
			registration_timestamp: value.registration_timestamp,
			last_renewal_timestamp: value.last_renewal_timestamp,
			eviction_timestamp: value.eviction_timestamp,
			service_up_timestamp: value.service_up_timestamp,
		}
	}
}
impl From<LeaseInfoWire> for LeaseInfo {
	fn from(value: LeaseInfoWire) -> Self {
		Self {
			renewal_interval_in_secs: value.renewal_interval_in_secs,
			duration_in_secs: value.duration_in_secs,
			registration_timestamp: value.registration_timestamp,
			last_renewal_timestamp: value.last_renewal_timestamp,
			eviction_timestamp: value.eviction_timestamp,
			service_up_timestamp: value.service_up_timestamp,
		}
	}
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
enum InstanceStatusWire {
	Up,
	Starting,
	OutOfService,
	Unknown,
	Down,
}
impl From<InstanceStatus> for InstanceStatusWire {
	fn from(value: InstanceStatus) -> Self {
		match value {
			InstanceStatus::Up => Self::Up,
			InstanceStatus::Starting => Self::Starting,
			InstanceStatus::OutOfService => Self::OutOfService,
			InstanceStatus::Unknown => Self::Unknown,
			InstanceStatus::Down => Self::Down,
		}
	}
}
impl From<InstanceStatusWire> for InstanceStatus {
	fn from(value: InstanceStatusWire) -> Self {
		match value {
			InstanceStatusWire::Up => Self::Up,
			InstanceStatusWire::Starting => Self::Starting,
			InstanceStatusWire::OutOfService => Self::OutOfService,
			InstanceStatusWire::Unknown => Self::Unknown,
			InstanceStatusWire::Down => Self::Down,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct InstanceInfoWire {
	#[serde(rename = "instanceId")]
	instance_id: String,
	#[serde(rename = "app")]
	app_name: String,
	#[serde(rename = "hostName")]
	host_name: String,
	#[serde(default, rename = "homePageUrl")]
	home_page_url: String,
	#[serde(default, rename = "statusPageUrl")]
	status_page_url: String,
	#[serde(default, rename = "healthCheckUrl")]
	health_check_url: String,
	#[serde(rename = "ipAddr")]
	ip_addr: String,
	#[serde(rename = "vipAddress")]
	vip_address: String,
	#[serde(default, rename = "secureVipAddress", skip_serializing_if = "Option::is_none")]
	secure_vip_address: Option<String>,
	port: PortWire,
	#[serde(rename = "securePort")]
	secure_port: PortWire,
	status: InstanceStatusWire,
	#[serde(default, rename = "overriddenstatus", skip_serializing_if = "Option::is_none")]
	overridden_status: Option<InstanceStatusWire>,
	#[serde(rename = "leaseInfo")]
	lease_info: LeaseInfoWire,
	#[serde(rename = "dataCenterInfo")]
	data_center_info: DataCenterInfoWire,
	#[serde(default)]
	metadata: std::collections::BTreeMap<String, String>,
	#[serde(default, rename = "isCoordinatingDiscoveryServer")]
	is_coordinating_discovery_server: bool,
	#[serde(default, rename = "lastUpdatedTimestamp", with = "millis_timestamp")]
	last_updated_timestamp: Option<DateTime<Utc>>,
	#[serde(default, rename = "lastDirtyTimestamp", with = "millis_timestamp")]
	last_dirty_timestamp: Option<DateTime<Utc>>,
	// The upstream server rejects an empty string here; `None` serializes as
	// `null` rather than being omitted, matching `to_json`'s explicit check.
	#[serde(default, rename = "actionType")]
	action_type: Option<String>,
	#[serde(default, rename = "countryId")]
	country_id: i64,
}
impl From<&InstanceInfo> for InstanceInfoWire {
	fn from(value: &InstanceInfo) -> Self {
		Self {
			instance_id: value.instance_id.clone(),
			app_name: value.app_name.clone(),
			host_name: value.host_name.clone(),
			home_page_url: value.home_page_url.clone(),
			status_page_url: value.status_page_url.clone(),
			health_check_url: value.health_check_url.clone(),
			ip_addr: value.ip_addr.clone(),
			vip_address: value.vip_address.clone(),
			secure_vip_address: value.secure_vip_address.clone(),
			port: value.port.into(),
			secure_port: value.secure_port.into(),
			status: value.status.into(),
			overridden_status: value.overridden_status.map(Into::into),
			lease_info: value.lease_info.clone().into(),
			data_center_info: value.data_center_info.clone().into(),
			metadata: value.metadata.clone(),
			is_coordinating_discovery_server: value.is_coordinating_discovery_server,
			last_updated_timestamp: value.last_updated_timestamp,
			last_dirty_timestamp: value.last_dirty_timestamp,
			action_type: value.action_type.clone(),
			country_id: value.country_id,
		}
	}
}
impl From<InstanceInfoWire> for InstanceInfo {
	fn from(value: InstanceInfoWire) -> Self {
		Self {
			instance_id: value.instance_id,
			app_name: value.app_name,
			host_name: value.host_name,
			home_page_url: value.home_page_url,
			status_page_url: value.status_page_url,
			health_check_url: value.health_check_url,
			ip_addr: value.ip_addr,
			vip_address: value.vip_address,
			secure_vip_address: value.secure_vip_address,
			port: value.port.into(),
			secure_port: value.secure_port.into(),
			status: value.status.into(),
			overridden_status: value.overridden_status.map(Into::into),
			lease_info: value.lease_info.into(),
			data_center_info: value.data_center_info.into(),
			metadata: value.metadata,
			is_coordinating_discovery_server: value.is_coordinating_discovery_server,
			last_updated_timestamp: value.last_updated_timestamp,
			last_dirty_timestamp: value.last_dirty_timestamp,
			action_type: value.action_type,
			country_id: value.country_id,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ApplicationWire {
	name: String,
	instance: Vec<InstanceInfoWire>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ApplicationsWire {
	#[serde(rename = "versions__delta", skip_serializing_if = "Option::is_none")]
	versions_delta: Option<String>,
	#[serde(rename = "apps__hashcode", skip_serializing_if = "Option::is_none")]
	apps_hashcode: Option<String>,
	#[serde(default, rename = "application")]
	application: Vec<ApplicationWire>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ApplicationsEnvelope {
	applications: ApplicationsWire,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ApplicationEnvelope {
	application: ApplicationWire,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct InstanceEnvelope {
	instance: InstanceInfoWire,
}

/// Serialize a single instance for registration, wrapped in Eureka's
/// `{"instance": {...}}` envelope.
pub(crate) fn serialize_instance(instance: &InstanceInfo) -> Result<Vec<u8>> {
	let wire = InstanceInfoWire::from(instance);
	let envelope = InstanceEnvelope { instance: wire };
	Ok(serde_json::to_vec(&envelope)?)
}

/// Parse a single-instance response body (`GET .../apps/{app}/{id}`).
pub(crate) fn parse_instance(bytes: &[u8]) -> Result<InstanceInfo> {
	let envelope: InstanceEnvelope = serde_json::from_slice(bytes)?;
	Ok(envelope.instance.into())
}

/// Parse a single-application response body (`GET .../apps/{app}`).
pub(crate) fn parse_application(bytes: &[u8]) -> Result<Application> {
	let envelope: ApplicationEnvelope = serde_json::from_slice(bytes)?;
	Ok(Application {
		name: envelope.application.name,
		instances: envelope.application.instance.into_iter().map(Into::into).collect(),
	})
}

/// Parse the full application-directory response body (`GET .../apps`).
pub(crate) fn parse_applications(bytes: &[u8]) -> Result<Applications> {
	let envelope: ApplicationsEnvelope = serde_json::from_slice(bytes)?;
	let applications = envelope
		.applications
		.application
		.into_iter()
		.map(|app| Application {
			name: app.name,
			instances: app.instance.into_iter().map(Into::into).collect(),
		})
		.collect();

	Ok(Applications {
		versions_delta: envelope.applications.versions_delta,
		apps_hashcode: envelope.applications.apps_hashcode,
		applications,
	})
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::model::{DataCenterInfo, LeaseInfo, Port};

	fn sample_instance() -> InstanceInfo {
		let stamp = chrono::DateTime::from_timestamp_millis(1_700_000_000_000).expect("valid millis");

		InstanceInfo {
			instance_id: "10.0.0.1:my-app:8080".into(),
			app_name: "MY-APP".into(),
			host_name: "10.0.0.1".into(),
			home_page_url: String::new(),
			status_page_url: String::new(),
			health_check_url: String::new(),
			ip_addr: "10.0.0.1".into(),
			vip_address: "my-app".into(),
			secure_vip_address: None,
			port: Port { number: 8080, enabled: true },
			secure_port: Port { number: 443, enabled: false },
			status: InstanceStatus::Up,
			overridden_status: None,
			lease_info: LeaseInfo::default(),
			data_center_info: DataCenterInfo::default(),
			metadata: Default::default(),
			is_coordinating_discovery_server: false,
			last_updated_timestamp: Some(stamp),
			last_dirty_timestamp: Some(stamp),
			action_type: None,
			country_id: 0,
		}
	}

	#[test]
	fn instance_round_trips_through_wire_envelope() {
		let original = sample_instance();
		let bytes = serialize_instance(&original).expect("serialize");
		let parsed = parse_instance(&bytes).expect("parse");

		assert_eq!(parsed, original);
	}

	#[test]
	fn port_enabled_flag_is_encoded_as_a_json_bool() {
		let bytes = serialize_instance(&sample_instance()).expect("serialize");
		let text = String::from_utf8(bytes).expect("utf8");

		assert!(text.contains("\"@enabled\":true"));
	}

	#[test]
	fn timestamps_are_encoded_as_epoch_millis_not_rfc3339() {
		let bytes = serialize_instance(&sample_instance()).expect("serialize");
		let text = String::from_utf8(bytes).expect("utf8");

		assert!(text.contains("\"lastUpdatedTimestamp\":1700000000000"));
		assert!(!text.contains("lastUpdatedTimestamp\":\""));
	}

	#[test]
	fn empty_action_type_serializes_as_null_rather_than_omitted() {
		let mut instance = sample_instance();

		instance.action_type = None;

		let bytes = serialize_instance(&instance).expect("serialize");
		let text = String::from_utf8(bytes).expect("utf8");

		assert!(text.contains("\"actionType\":null"));
	}

	#[test]
	fn parses_applications_envelope_with_hashcode() {
		let body = r#"{
			"applications": {
				"versions__delta": "1",
				"apps__hashcode": "UP_1_",
				"application": [
					{
						"name": "MY-APP",
						"instance": []
					}
				]
			}
		}"#;
		let parsed = parse_applications(body.as_bytes()).expect("parse");

		assert_eq!(parsed.applications.len(), 1);
		assert_eq!(parsed.apps_hashcode.as_deref(), Some("UP_1_"));
	}
}
