//! Thin transport façade over `reqwest`, issuing one HTTP exchange at a time.
//!
//! Endpoint failover and retry decisions live in [`crate::http::retry`]; this
//! module only knows how to perform a single attempt and report back enough
//! information (status, body, `Location` header) for the retry loop to act on.

// crates.io
use reqwest::{Certificate, Client, Identity, Method, StatusCode, header::LOCATION};
use url::Url;
// self
use crate::{_prelude::*, config::TlsConfig};

/// Result of a single HTTP attempt against one endpoint.
#[derive(Debug)]
pub struct Exchange {
	/// Status code returned by the endpoint.
	pub status: StatusCode,
	/// Raw response body.
	pub body: bytes::Bytes,
	/// `Location` header, present on `307` responses.
	pub location: Option<String>,
}
impl Exchange {
	/// Whether this exchange represents a successful (2xx) response.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}
}

/// Build the shared `reqwest::Client` used for all registry exchanges.
///
/// Redirects are never followed automatically: `307` handling is the retry
/// controller's responsibility so it can retarget against the configured
/// endpoint list rather than an arbitrary location.
pub fn build_client(max_conn_count: usize) -> Result<Client> {
	build_client_with_tls(max_conn_count, None)
}

/// As [`build_client`], additionally forwarding a [`TlsConfig`] to the
/// transport. This agent does not perform certificate validation or
/// negotiation itself; the config struct is passed through to `reqwest`
/// unmodified.
pub fn build_client_with_tls(max_conn_count: usize, tls: Option<&TlsConfig>) -> Result<Client> {
	let mut builder = Client::builder()
		.redirect(reqwest::redirect::Policy::none())
		.user_agent(format!("eureka-agent/{}", env!("CARGO_PKG_VERSION")))
		.pool_max_idle_per_host(max_conn_count)
		.connect_timeout(Duration::from_secs(5));

	if let Some(tls) = tls {
		builder = builder
			.danger_accept_invalid_certs(!tls.verify_peer)
			.danger_accept_invalid_hostnames(!tls.verify_host);

		if let (Some(cert_path), Some(key_path)) = (&tls.cert_path, &tls.key_path) {
			let mut pem = std::fs::read(cert_path)?;

			pem.extend(std::fs::read(key_path)?);
			builder = builder.identity(Identity::from_pem(&pem)?);
		}

		if let Some(ca_info) = &tls.ca_info {
			let pem = std::fs::read(ca_info)?;

			builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
		}
	}

	Ok(builder.build()?)
}

/// Perform a single HTTP attempt against `endpoint` joined with `path`.
pub async fn request(
	client: &Client,
	method: Method,
	endpoint: &Url,
	path: &str,
	body: Option<Vec<u8>>,
	attempt_timeout: Duration,
) -> Result<Exchange> {
	let url = endpoint.join(path)?;
	let mut builder = client.request(method, url).timeout(attempt_timeout);

	builder = builder.header("Accept", "application/json");

	if let Some(body) = body {
		builder = builder.header("Content-Type", "application/json").body(body);
	}

	let started = Instant::now();
	let response = builder.send().await?;
	let status = response.status();
	let location =
		response.headers().get(LOCATION).and_then(|v| v.to_str().ok()).map(str::to_owned);
	let elapsed = started.elapsed();
	let body = response.bytes().await?;

	tracing::debug!(%status, ?elapsed, url = %endpoint, path, "registry exchange complete");

	Ok(Exchange { status, body, location })
}
