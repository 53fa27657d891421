//! Integration tests for self-registration and lease renewal.

// std
use std::time::Duration;
// crates.io
use eureka_agent::{Agent, AgentConfig, Result};
use url::Url;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

#[tokio::test]
async fn registers_then_heartbeats_on_schedule() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/eureka/apps/MY-APP"))
		.respond_with(ResponseTemplate::new(204))
		.expect(1)
		.mount(&server)
		.await;

	Mock::given(method("PUT"))
		.and(path("/eureka/apps/MY-APP/MY-APP:127.0.0.1:9999"))
		.respond_with(ResponseTemplate::new(200))
		.expect(1..)
		.mount(&server)
		.await;

	let endpoint = Url::parse(&server.uri()).expect("endpoint");
	let config = AgentConfig::builder(vec![endpoint])
		.heartbeat_period(Duration::from_millis(50))
		.refresh_period(Duration::from_secs(60))
		.build()?;
	let agent = Agent::new(config)?;

	let ins_id = agent.register_self("MY-APP", "127.0.0.1", 9999).await?;

	assert_eq!(ins_id, "MY-APP:127.0.0.1:9999");

	agent.start();
	tokio::time::sleep(Duration::from_millis(200)).await;
	agent.stop();

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn unregister_stops_further_heartbeats() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/eureka/apps/MY-APP"))
		.respond_with(ResponseTemplate::new(204))
		.mount(&server)
		.await;
	Mock::given(method("DELETE"))
		.and(path("/eureka/apps/MY-APP/MY-APP:127.0.0.1:9999"))
		.respond_with(ResponseTemplate::new(200))
		.expect(1)
		.mount(&server)
		.await;

	let endpoint = Url::parse(&server.uri()).expect("endpoint");
	let config = AgentConfig::builder(vec![endpoint])
		.heartbeat_period(Duration::from_millis(50))
		.refresh_period(Duration::from_secs(60))
		.build()?;
	let agent = Agent::new(config)?;

	agent.register_self("MY-APP", "127.0.0.1", 9999).await?;
	agent.start();
	agent.unregister("MY-APP", "MY-APP:127.0.0.1:9999").await?;
	tokio::time::sleep(Duration::from_millis(150)).await;
	agent.stop();

	server.verify().await;

	Ok(())
}
