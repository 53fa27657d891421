//! Client-side service-discovery agent for Eureka-style registries: instance
//! registration and heartbeat, a continuously refreshed local directory per
//! watched application, and failover-aware peer selection.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod agent;
pub mod config;
pub mod directory;
pub mod heartbeat;
pub mod http;
#[cfg(feature = "metrics")] pub mod metrics;
pub mod model;
pub mod registry;
pub mod selection;
pub mod wire;

mod error;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	agent::{Agent, PeerStatus},
	config::{AgentConfig, AgentConfigBuilder, TlsConfig},
	error::{Error, Result},
	heartbeat::HeartbeatStatus,
};

#[cfg(test)]
mod _test {
	use metrics_util as _;
	use tracing_subscriber as _;
	use wiremock as _;
}
