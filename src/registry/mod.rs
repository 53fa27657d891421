//! Typed façade over the Eureka v2 REST API.
//!
//! Every operation composes a path (and, where needed, a query string) and
//! submits it through the retry/endpoint-failover layer in
//! [`crate::http::retry`], then parses the response body via
//! [`crate::wire`]. Grounded on `eureka_connect.cpp`'s per-operation methods
//! (`queryInsAll`, `registerIns`, `sendHeart`, ...), covering the full
//! registry operation table in one client.

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// crates.io
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Method, StatusCode};
use url::Url;
// self
use crate::{
	_prelude::*,
	http::{
		client,
		retry::{RetryDecision, RetryExecutor, RetryFn},
	},
	model::{Application, Applications, DataCenterInfo, InstanceInfo, InstanceStatus, Port},
	wire,
};

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Characters left unescaped when encoding a path segment or query
/// component, matching the reference client's `helpers::encodeUrl`.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

fn encode(segment: &str) -> String {
	utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Typed client for the Eureka registry REST API, backed by endpoint
/// failover and retry.
#[derive(Debug)]
pub struct RegistryClient {
	client: reqwest::Client,
	endpoints: Vec<Url>,
	current_index: AtomicUsize,
	retry_fn: Option<RetryFn>,
}
impl RegistryClient {
	pub(crate) fn new(
		client: reqwest::Client,
		endpoints: Vec<Url>,
		retry_fn: Option<RetryFn>,
	) -> Self {
		Self { client, endpoints, current_index: AtomicUsize::new(0), retry_fn }
	}

	/// Endpoint the next call will start from.
	pub fn current_endpoint(&self) -> &Url {
		&self.endpoints[self.current_index.load(Ordering::Acquire) % self.endpoints.len()]
	}

	/// Switch the "current" endpoint explicitly.
	pub fn switch_endpoint(&self, index: usize) {
		self.current_index.store(index % self.endpoints.len(), Ordering::Release);
	}

	/// Full application directory.
	#[tracing::instrument(skip(self))]
	pub async fn query_ins_all(&self) -> Result<Vec<InstanceInfo>> {
		let body = self.execute(Method::GET, "/eureka/apps".to_owned(), None, None).await?;
		let apps = wire::parse_applications(&body)?;

		Ok(flatten(apps))
	}

	/// Instances of one application.
	#[tracing::instrument(skip(self))]
	pub async fn query_ins_by_app_id(&self, app_id: &str) -> Result<Vec<InstanceInfo>> {
		let path = format!("/eureka/apps/{}", encode(app_id));
		let body = self.execute(Method::GET, path, None, None).await?;
		let app = wire::parse_application(&body)?;

		Ok(app.instances)
	}

	/// One instance within one application.
	#[tracing::instrument(skip(self))]
	pub async fn query_ins_by_app_id_ins_id(
		&self,
		app_id: &str,
		ins_id: &str,
	) -> Result<InstanceInfo> {
		let path = format!("/eureka/apps/{}/{}", encode(app_id), encode(ins_id));
		let body = self.execute(Method::GET, path, None, None).await?;

		wire::parse_instance(&body)
	}

	/// Instances behind a virtual IP address.
	#[tracing::instrument(skip(self))]
	pub async fn query_ins_by_vip(&self, vip: &str) -> Result<Vec<InstanceInfo>> {
		let path = format!("/eureka/vips/{}", encode(vip));
		let body = self.execute(Method::GET, path, None, None).await?;
		let apps = wire::parse_applications(&body)?;

		Ok(flatten(apps))
	}

	/// Instances behind a secure virtual IP address.
	#[tracing::instrument(skip(self))]
	pub async fn query_ins_by_svip(&self, svip: &str) -> Result<Vec<InstanceInfo>> {
		let path = format!("/eureka/svips/{}", encode(svip));
		let body = self.execute(Method::GET, path, None, None).await?;
		let apps = wire::parse_applications(&body)?;

		Ok(flatten(apps))
	}

	/// Register an instance with the registry.
	#[tracing::instrument(skip(self, instance), fields(app = %instance.app_name, instance = %instance.instance_id))]
	pub async fn register(&self, instance: &InstanceInfo) -> Result<()> {
		let path = format!("/eureka/apps/{}", encode(&instance.app_name));
		let body = wire::serialize_instance(instance)?;

		self.execute(Method::POST, path, None, Some(body)).await?;

		Ok(())
	}

	/// Remove an instance from the registry.
	#[tracing::instrument(skip(self))]
	pub async fn unregister(&self, app_id: &str, ins_id: &str) -> Result<()> {
		let path = format!("/eureka/apps/{}/{}", encode(app_id), encode(ins_id));

		self.execute(Method::DELETE, path, None, None).await?;

		Ok(())
	}

	/// Renew an instance's lease.
	#[tracing::instrument(skip(self))]
	pub async fn heartbeat(&self, app_id: &str, ins_id: &str) -> Result<()> {
		let path = format!("/eureka/apps/{}/{}", encode(app_id), encode(ins_id));

		self.execute(Method::PUT, path, None, None).await?;

		Ok(())
	}

	/// Mark an instance out of service.
	#[tracing::instrument(skip(self))]
	pub async fn status_out_of_service(&self, app_id: &str, ins_id: &str) -> Result<()> {
		let path = format!("/eureka/apps/{}/{}/status", encode(app_id), encode(ins_id));

		self.execute(Method::PUT, path, Some("value=OUT_OF_SERVICE".to_owned()), None).await?;

		Ok(())
	}

	/// Clear an out-of-service override, restoring `UP`.
	#[tracing::instrument(skip(self))]
	pub async fn status_up(&self, app_id: &str, ins_id: &str) -> Result<()> {
		let path = format!("/eureka/apps/{}/{}/status", encode(app_id), encode(ins_id));

		self.execute(Method::DELETE, path, Some("value=UP".to_owned()), None).await?;

		Ok(())
	}

	/// Update one metadata key on an instance.
	#[tracing::instrument(skip(self, value))]
	pub async fn update_metadata(
		&self,
		app_id: &str,
		ins_id: &str,
		key: &str,
		value: &str,
	) -> Result<()> {
		let path = format!("/eureka/apps/{}/{}/metadata", encode(app_id), encode(ins_id));
		let query = format!("{}={}", encode(key), encode(value));

		self.execute(Method::PUT, path, Some(query), None).await?;

		Ok(())
	}

	/// Run one logical request through the retry/endpoint-failover loop,
	/// mirroring `EurekaConnect::request`.
	async fn execute(
		&self,
		method: Method,
		path: String,
		query: Option<String>,
		body: Option<Vec<u8>>,
	) -> Result<bytes::Bytes> {
		let full_path = match query {
			Some(q) if !q.is_empty() => format!("{path}?{q}"),
			_ => path,
		};
		let mut executor = RetryExecutor::new(
			&self.endpoints,
			self.current_index.load(Ordering::Acquire),
			self.retry_fn.as_ref(),
		);

		loop {
			let endpoint = executor.current_endpoint().clone();
			let attempt =
				client::request(&self.client, method.clone(), &endpoint, &full_path, body.clone(), ATTEMPT_TIMEOUT)
					.await;

			match attempt {
				Ok(exchange) if exchange.is_success() => {
					self.current_index.store(executor.current_index(), Ordering::Release);

					return Ok(exchange.body);
				},
				Ok(exchange) => {
					let status = exchange.status;
					let decision = executor.on_response(status, exchange.location.as_deref());

					match decision {
						RetryDecision::Stop => {
							self.current_index.store(executor.current_index(), Ordering::Release);

							if status == StatusCode::NOT_FOUND {
								return Err(Error::NotFound);
							}

							return Err(Error::BadStatus {
								status,
								endpoint,
								body: String::from_utf8(exchange.body.to_vec()).ok(),
							});
						},
						RetryDecision::SameEndpoint { backoff }
						| RetryDecision::NextEndpoint { backoff }
						| RetryDecision::Redirect { backoff, .. } => {
							if !backoff.is_zero() {
								tokio::time::sleep(backoff).await;
							}
						},
					}
				},
				Err(net_err) => match executor.on_net_error() {
					RetryDecision::Stop => return Err(Error::Net(net_err)),
					_ => continue,
				},
			}
		}
	}
}

fn flatten(apps: Applications) -> Vec<InstanceInfo> {
	apps.applications.into_iter().flat_map(|app: Application| app.instances).collect()
}

/// Build the default registration payload for `registerIns(app, ip, port)`,
/// mirroring `EurekaConnect::getEmptyIns`.
pub fn empty_instance(app_id: &str, ins_id: &str, port: u16, ip_addr: &str) -> InstanceInfo {
	let now = Utc::now();

	InstanceInfo {
		instance_id: ins_id.to_owned(),
		app_name: app_id.to_owned(),
		host_name: ip_addr.to_owned(),
		home_page_url: String::new(),
		status_page_url: String::new(),
		health_check_url: String::new(),
		ip_addr: ip_addr.to_owned(),
		vip_address: ip_addr.to_owned(),
		secure_vip_address: Some(ip_addr.to_owned()),
		port: Port { number: port, enabled: true },
		secure_port: Port { number: port, enabled: false },
		status: InstanceStatus::Up,
		overridden_status: Some(InstanceStatus::Unknown),
		lease_info: Default::default(),
		// `getEmptyIns` hardcodes the self-registration data-center class,
		// which differs from `DataCenterInfo::default()`'s generic one.
		data_center_info: DataCenterInfo {
			name: "MyOwn".to_owned(),
			class_name: "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo".to_owned(),
		},
		metadata: Default::default(),
		is_coordinating_discovery_server: false,
		last_updated_timestamp: Some(now),
		last_dirty_timestamp: Some(now),
		action_type: None,
		// Matches the reference client's `getEmptyIns`, which hardcodes 1.
		country_id: 1,
	}
}

/// Derive the `app:ipAddr:port` instance id the reference client assigns to
/// self-registered instances (`EurekaAgent::makeInsId`).
pub fn make_instance_id(app_id: &str, ip_addr: &str, port: u16) -> String {
	format!("{app_id}:{ip_addr}:{port}")
}
