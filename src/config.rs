//! Agent configuration: endpoints, connection limits, TLS, retry and timer periods.

// crates.io
use url::Url;
// self
use crate::{_prelude::*, http::retry::RetryFn};

const DEFAULT_CONN_COUNT: usize = 3;
const DEFAULT_MAX_CONN_COUNT: usize = 1000;
const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(3);
const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(3);
const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// TLS material passed through to the transport layer without further
/// validation; the agent does not perform certificate handling itself.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
	/// Client certificate path.
	pub cert_path: Option<String>,
	/// Client private key path.
	pub key_path: Option<String>,
	/// Passphrase protecting the private key, if any.
	pub key_pass: Option<String>,
	/// CA bundle directory.
	pub ca_path: Option<String>,
	/// CA bundle file.
	pub ca_info: Option<String>,
	/// Whether to verify the peer certificate chain.
	pub verify_peer: bool,
	/// Whether to verify the peer hostname.
	pub verify_host: bool,
	/// Whether to verify OCSP status.
	pub verify_status: bool,
}

/// Validated configuration for an [`Agent`](crate::agent::Agent).
#[derive(Clone, Debug)]
pub struct AgentConfig {
	pub(crate) endpoints: Vec<Url>,
	pub(crate) default_conn_count: usize,
	pub(crate) max_conn_count: usize,
	pub(crate) tls: Option<TlsConfig>,
	pub(crate) retry_fn: Option<RetryFn>,
	pub(crate) heartbeat_period: Duration,
	pub(crate) refresh_period: Duration,
	pub(crate) worker_pool_size: usize,
}
impl AgentConfig {
	/// Start building a configuration from a non-empty endpoint list.
	pub fn builder(endpoints: Vec<Url>) -> AgentConfigBuilder {
		AgentConfigBuilder::new(endpoints)
	}

	/// Configured registry endpoints, in priority order.
	pub fn endpoints(&self) -> &[Url] {
		&self.endpoints
	}

	fn validate(&self) -> Result<()> {
		if self.endpoints.is_empty() {
			return Err(Error::Param { field: "endpoints", reason: "must not be empty".into() });
		}
		for endpoint in &self.endpoints {
			if endpoint.host_str().is_none() {
				return Err(Error::Param {
					field: "endpoints",
					reason: format!("'{endpoint}' has no host"),
				});
			}
		}
		if self.default_conn_count == 0 {
			return Err(Error::Param {
				field: "default_conn_count",
				reason: "must be greater than zero".into(),
			});
		}
		if self.default_conn_count > self.max_conn_count {
			return Err(Error::Param {
				field: "default_conn_count",
				reason: "must not exceed max_conn_count".into(),
			});
		}
		if self.heartbeat_period.is_zero() {
			return Err(Error::Param {
				field: "heartbeat_period",
				reason: "must be greater than zero".into(),
			});
		}
		if self.refresh_period.is_zero() {
			return Err(Error::Param {
				field: "refresh_period",
				reason: "must be greater than zero".into(),
			});
		}
		if self.worker_pool_size == 0 {
			return Err(Error::Param {
				field: "worker_pool_size",
				reason: "must be greater than zero".into(),
			});
		}
		if let Some(tls) = &self.tls
			&& tls.key_path.is_some()
			&& tls.cert_path.is_none()
		{
			return Err(Error::Param {
				field: "tls.cert_path",
				reason: "a key without a certificate is not usable".into(),
			});
		}

		Ok(())
	}
}

/// Builder for [`AgentConfig`], mirroring the registry-wide defaults a
/// provider registration can later override.
#[derive(Clone, Debug)]
pub struct AgentConfigBuilder {
	config: AgentConfig,
}
impl AgentConfigBuilder {
	/// Start a new builder with the given endpoints and otherwise-default settings.
	pub fn new(endpoints: Vec<Url>) -> Self {
		Self {
			config: AgentConfig {
				endpoints,
				default_conn_count: DEFAULT_CONN_COUNT,
				max_conn_count: DEFAULT_MAX_CONN_COUNT,
				tls: None,
				retry_fn: None,
				heartbeat_period: DEFAULT_HEARTBEAT_PERIOD,
				refresh_period: DEFAULT_REFRESH_PERIOD,
				worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
			},
		}
	}

	/// Default number of pooled connections per endpoint.
	pub fn default_conn_count(mut self, value: usize) -> Self {
		self.config.default_conn_count = value;
		self
	}

	/// Hard cap on pooled connections per endpoint.
	pub fn max_conn_count(mut self, value: usize) -> Self {
		self.config.max_conn_count = value;
		self
	}

	/// Attach TLS material, passed through to the transport unmodified.
	pub fn tls(mut self, tls: TlsConfig) -> Self {
		self.config.tls = Some(tls);
		self
	}

	/// Override the default retry-eligibility function.
	pub fn retry_fn(mut self, retry_fn: RetryFn) -> Self {
		self.config.retry_fn = Some(retry_fn);
		self
	}

	/// Heartbeat scheduling cadence.
	pub fn heartbeat_period(mut self, value: Duration) -> Self {
		self.config.heartbeat_period = value;
		self
	}

	/// Directory refresh scheduling cadence.
	pub fn refresh_period(mut self, value: Duration) -> Self {
		self.config.refresh_period = value;
		self
	}

	/// Size of the shared worker pool servicing timer jobs.
	pub fn worker_pool_size(mut self, value: usize) -> Self {
		self.config.worker_pool_size = value;
		self
	}

	/// Validate and produce the final configuration.
	pub fn build(self) -> Result<AgentConfig> {
		self.config.validate()?;
		Ok(self.config)
	}
}
