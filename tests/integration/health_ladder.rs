//! Integration tests for the per-peer error-state cold-down ladder.

// std
use std::time::Duration;
// crates.io
use eureka_agent::{Agent, AgentConfig, Result};
use url::Url;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

fn instance_json(app: &str, id: &str, ip: &str, port: u16) -> String {
	format!(
		r#"{{
			"instanceId": "{id}",
			"app": "{app}",
			"hostName": "{ip}",
			"ipAddr": "{ip}",
			"vipAddress": "{app}",
			"port": {{"$": {port}, "@enabled": true}},
			"securePort": {{"$": 443, "@enabled": false}},
			"status": "UP",
			"leaseInfo": {{"renewalIntervalInSecs": 30, "durationInSecs": 90}},
			"dataCenterInfo": {{"name": "MyOwn", "@class": "com.netflix.appinfo.MyDataCenterInfo"}}
		}}"#
	)
}

#[tokio::test]
async fn repeated_failures_raise_the_error_step() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let base = Url::parse(&server.uri()).expect("mock url");
	let ip = base.host_str().expect("host present").to_owned();
	let port = base.port().expect("port present");
	let body = format!(
		r#"{{"application": {{"name": "MY-APP", "instance": [{}]}}}}"#,
		instance_json("MY-APP", "MY-APP:peer-1", &ip, port)
	);

	Mock::given(method("GET"))
		.and(path("/eureka/apps/MY-APP"))
		.respond_with(ResponseTemplate::new(200).set_body_string(body))
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/flaky"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&server)
		.await;

	let config = AgentConfig::builder(vec![base])
		.refresh_period(Duration::from_millis(50))
		.build()?;
	let agent = Agent::new(config)?;

	let handle = agent.get_handle("MY-APP").await?;

	// `request` treats any HTTP response, `5xx` included, as success for the
	// health ladder; only `request_resp_data` reports a `5xx` as a failure.
	assert!(handle.request_resp_data(reqwest::Method::GET, "/flaky", None).await.is_err());

	drop(handle);

	// One refresh tick advances the error ladder from the recorded failure.
	tokio::time::sleep(Duration::from_millis(150)).await;
	agent.start();
	tokio::time::sleep(Duration::from_millis(150)).await;
	agent.stop();

	let status = agent.peer_status("MY-APP", "MY-APP:peer-1").await.expect("peer known");

	assert!(status.is_err);
	assert!(status.error_step >= 1);

	Ok(())
}

#[tokio::test]
async fn client_error_is_reported_as_success_but_still_surfaced_for_resp_data_requests()
-> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let base = Url::parse(&server.uri()).expect("mock url");
	let ip = base.host_str().expect("host present").to_owned();
	let port = base.port().expect("port present");
	let body = format!(
		r#"{{"application": {{"name": "MY-APP", "instance": [{}]}}}}"#,
		instance_json("MY-APP", "MY-APP:peer-1", &ip, port)
	);

	Mock::given(method("GET"))
		.and(path("/eureka/apps/MY-APP"))
		.respond_with(ResponseTemplate::new(200).set_body_string(body))
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/not-found"))
		.respond_with(ResponseTemplate::new(404).set_body_string("nope"))
		.mount(&server)
		.await;

	let config = AgentConfig::builder(vec![base])
		.refresh_period(Duration::from_secs(60))
		.build()?;
	let agent = Agent::new(config)?;
	let handle = agent.get_handle("MY-APP").await?;

	// A 4xx still means the peer answered, so it counts as a success for the
	// health ladder's purposes, but the caller sees a `BadStatus` error.
	let err = handle
		.request_resp_data(reqwest::Method::GET, "/not-found", None)
		.await
		.expect_err("4xx must still surface as an error to the caller");

	assert!(matches!(err, eureka_agent::Error::BadStatus { .. }));

	let status = agent.peer_status("MY-APP", "MY-APP:peer-1").await.expect("peer known");

	assert_eq!(status.error_step, 0, "a 4xx must not raise the cold-down ladder");

	Ok(())
}
