//! Integration tests for directory refresh and peer selection.

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
async fn get_handle_triggers_lazy_refresh_and_targets_the_peer() -> Result<()> {
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
		.expect(1..)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/health"))
		.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
		.expect(1)
		.mount(&server)
		.await;

	let config = AgentConfig::builder(vec![base])
		.refresh_period(Duration::from_secs(60))
		.build()?;
	let agent = Agent::new(config)?;

	let handle = agent.get_handle("MY-APP").await?;

	assert_eq!(handle.instance_id(), "MY-APP:peer-1");

	let exchange = handle.request(reqwest::Method::GET, "/health", None).await?;

	assert!(exchange.is_success());
	assert_eq!(&exchange.body[..], b"ok");

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn refresh_removes_peers_no_longer_reported() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let base = Url::parse(&server.uri()).expect("mock url");
	let ip = base.host_str().expect("host present").to_owned();
	let port = base.port().expect("port present");
	let two_peer_body = format!(
		r#"{{"application": {{"name": "MY-APP", "instance": [{}, {}]}}}}"#,
		instance_json("MY-APP", "MY-APP:peer-1", &ip, port),
		instance_json("MY-APP", "MY-APP:peer-2", &ip, port),
	);
	let one_peer_body = format!(
		r#"{{"application": {{"name": "MY-APP", "instance": [{}]}}}}"#,
		instance_json("MY-APP", "MY-APP:peer-1", &ip, port)
	);

	Mock::given(method("GET"))
		.and(path("/eureka/apps/MY-APP"))
		.respond_with(ResponseTemplate::new(200).set_body_string(two_peer_body))
		.up_to_n_times(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/eureka/apps/MY-APP"))
		.respond_with(ResponseTemplate::new(200).set_body_string(one_peer_body))
		.mount(&server)
		.await;

	let config = AgentConfig::builder(vec![base])
		.refresh_period(Duration::from_millis(50))
		.build()?;
	let agent = Agent::new(config)?;

	agent.get_handle("MY-APP").await?;

	assert!(agent.peer_status("MY-APP", "MY-APP:peer-2").await.is_some());

	agent.start();
	tokio::time::sleep(Duration::from_millis(300)).await;
	agent.stop();

	assert!(agent.peer_status("MY-APP", "MY-APP:peer-2").await.is_none());
	assert!(agent.peer_status("MY-APP", "MY-APP:peer-1").await.is_some());

	Ok(())
}
