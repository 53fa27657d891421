//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the registry agent.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	SystemTime(#[from] std::time::SystemTimeError),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Invalid parameter {field}: {reason}")]
	Param { field: &'static str, reason: String },
	#[error(transparent)]
	Net(#[from] reqwest::Error),
	#[error("Upstream status {status} from {endpoint}: {body:?}")]
	BadStatus { status: http::StatusCode, endpoint: url::Url, body: Option<String> },
	#[error("Instance or application not found")]
	NotFound,
	#[error(transparent)]
	Format(#[from] serde_json::Error),
	#[error("Operation aborted")]
	Aborted,
	#[error("Agent has been stopped")]
	Stopped,
	#[error("App '{app}' instance '{instance:?}' is not registered")]
	NotRegistered { app: String, instance: Option<String> },

	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("{0}")]
	Other(String),
}
#[cfg(feature = "metrics")]
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Metrics(value.to_string())
	}
}
