//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the SSO gate crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Invalid request: {0}.")]
	InvalidRequest(&'static str),
	#[error(transparent)]
	Load(#[from] LoadError),
	#[error("Principal '{principal}' is not known to the group lookup service.")]
	PrincipalUnknown { principal: u64 },
	#[error("Identity token verification failed: {0}")]
	TokenVerification(#[from] jsonwebtoken::errors::Error),
	#[error("Authorization server rejected the code exchange with status {status}: {body:?}")]
	UpstreamAuth { status: reqwest::StatusCode, body: Option<String> },
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	UpstreamStatus { status: reqwest::StatusCode, url: url::Url, body: Option<String> },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}

/// Terminal failure of a cache load after the retry budget is exhausted.
///
/// Cloneable so the single-flight broadcast can hand every waiter the same
/// outcome; the last underlying error is retained in rendered form.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Loader failed after {attempts} attempt(s): {last_error}")]
pub struct LoadError {
	/// Number of loader attempts that were performed.
	pub attempts: u32,
	/// Rendered message of the last underlying failure.
	pub last_error: String,
}
