//! OAuth2 login-state management for the external identity provider.
//!
//! Issues one-time CSRF state tokens bound to a session, validates them on
//! callback, and performs the authorization-code token exchange.

// std
use std::collections::HashMap;
// crates.io
use base64::prelude::*;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle, time};
use url::Url;
// self
use crate::_prelude::*;

/// Default lifetime of an issued login state.
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for the identity provider client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SsoClientConfig {
	/// OAuth2 client identifier issued by the provider.
	pub client_id: String,
	/// OAuth2 client secret issued by the provider.
	pub client_secret: String,
	/// Callback URL registered with the provider.
	pub redirect_uri: Url,
	/// The provider's authorization endpoint.
	pub authorize_url: Url,
	/// The provider's token endpoint.
	pub token_url: Url,
	/// Scopes requested during login.
	#[serde(default)]
	pub scopes: Vec<String>,
	/// Lifetime of an issued login state before it expires.
	#[serde(default = "default_state_timeout")]
	pub state_timeout: Duration,
}
impl SsoClientConfig {
	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.client_id.is_empty() {
			return Err(Error::Validation {
				field: "client_id",
				reason: "Must not be empty.".into(),
			});
		}
		if self.client_secret.is_empty() {
			return Err(Error::Validation {
				field: "client_secret",
				reason: "Must not be empty.".into(),
			});
		}
		if self.state_timeout.is_zero() {
			return Err(Error::Validation {
				field: "state_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}

/// Verified identity decoded from the provider's identity token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifiedIdentity {
	/// Stable subject identifier of the principal.
	pub subject: String,
	/// Display name, when the provider supplies one.
	pub name: Option<String>,
	/// Scopes granted to the token.
	pub scopes: Vec<String>,
	/// Expiry of the identity token.
	pub expires_at: DateTime<Utc>,
}

/// Verifies a raw identity token against the expected audience.
pub trait IdentityVerifier: Send + Sync {
	/// Check signature, audience, and expiry, returning the decoded identity.
	fn verify(&self, raw_token: &str, expected_audience: &str) -> Result<VerifiedIdentity>;
}

/// [`IdentityVerifier`] backed by `jsonwebtoken`.
pub struct JwtVerifier {
	key: DecodingKey,
	algorithm: Algorithm,
}
impl JwtVerifier {
	/// Build a verifier from the provider's decoding key.
	pub fn new(key: DecodingKey, algorithm: Algorithm) -> Self {
		Self { key, algorithm }
	}
}
impl IdentityVerifier for JwtVerifier {
	fn verify(&self, raw_token: &str, expected_audience: &str) -> Result<VerifiedIdentity> {
		let mut validation = Validation::new(self.algorithm);

		validation.set_audience(&[expected_audience]);

		let data = jsonwebtoken::decode::<IdentityClaims>(raw_token, &self.key, &validation)?;
		let claims = data.claims;
		let expires_at =
			DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or(Error::Validation {
				field: "exp",
				reason: "Expiry claim is out of range.".into(),
			})?;

		let scopes = claims.scopes();

		Ok(VerifiedIdentity { subject: claims.sub, name: claims.name, scopes, expires_at })
	}
}

#[derive(Debug, Deserialize)]
struct IdentityClaims {
	sub: String,
	#[serde(default)]
	name: Option<String>,
	// Providers ship this as either a single string or an array.
	#[serde(default)]
	scp: serde_json::Value,
	exp: i64,
}
impl IdentityClaims {
	fn scopes(&self) -> Vec<String> {
		match &self.scp {
			serde_json::Value::String(scope) => vec![scope.clone()],
			serde_json::Value::Array(items) =>
				items.iter().filter_map(|item| item.as_str().map(str::to_string)).collect(),
			_ => Vec::new(),
		}
	}
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access_token: String,
}

#[derive(Debug)]
struct LoginState {
	session_id: String,
	created_at: Instant,
}

/// Tracks OAuth2 login states and performs the provider handshake.
///
/// Cheap to clone; clones share the login-state store and the cleanup
/// schedule. The store is owned by this client and torn down with it, so
/// independent instances never cross-contaminate.
#[derive(Clone)]
pub struct SsoClient {
	config: Arc<SsoClientConfig>,
	http: Client,
	verifier: Arc<dyn IdentityVerifier>,
	states: Arc<Mutex<HashMap<String, LoginState>>>,
	cleanup: Arc<Mutex<Option<JoinHandle<()>>>>,
}
impl SsoClient {
	/// Build a new client with the default reqwest client.
	pub fn new(config: SsoClientConfig, verifier: impl IdentityVerifier + 'static) -> Result<Self> {
		config.validate()?;

		let http = Client::builder()
			.user_agent(format!("sso-gate/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self::with_client(config, http, verifier))
	}

	/// Build a client using the supplied HTTP client (primarily for tests).
	pub fn with_client(
		config: SsoClientConfig,
		http: Client,
		verifier: impl IdentityVerifier + 'static,
	) -> Self {
		Self {
			config: Arc::new(config),
			http,
			verifier: Arc::new(verifier),
			states: Arc::new(Mutex::new(HashMap::new())),
			cleanup: Arc::new(Mutex::new(None)),
		}
	}

	/// Build the authorization URL a user is redirected to for login.
	///
	/// Issues a cryptographically random, single-use state token bound to
	/// `session_id`.
	#[tracing::instrument(skip_all)]
	pub async fn start_login(&self, session_id: &str) -> Result<Url> {
		let token = state_token();
		let mut url = self.config.authorize_url.clone();

		{
			let mut pairs = url.query_pairs_mut();

			pairs
				.append_pair("response_type", "code")
				.append_pair("redirect_uri", self.config.redirect_uri.as_str())
				.append_pair("client_id", &self.config.client_id);

			if !self.config.scopes.is_empty() {
				pairs.append_pair("scope", &self.config.scopes.join(" "));
			}

			pairs.append_pair("state", &token);
		}
		{
			let mut states = self.states.lock().await;

			states.insert(
				token,
				LoginState { session_id: session_id.to_owned(), created_at: Instant::now() },
			);
		}

		tracing::debug!("issued login state");

		Ok(url)
	}

	/// Validate the provider callback and perform the code exchange.
	///
	/// The state token is consumed regardless of the outcome. Unknown,
	/// expired, and session-mismatched states are deliberately
	/// indistinguishable in the returned error.
	#[tracing::instrument(skip_all)]
	pub async fn handle_callback(
		&self,
		session_id: &str,
		callback_url: &Url,
	) -> Result<VerifiedIdentity> {
		// First occurrence wins when a parameter is repeated.
		let state = first_query_value(callback_url, "state")
			.ok_or(Error::InvalidRequest("missing state"))?;
		let code = first_query_value(callback_url, "code")
			.ok_or(Error::InvalidRequest("missing code"))?;
		// The map lock makes the lookup-and-delete atomic under concurrent
		// callbacks presenting the same token.
		let recorded = {
			let mut states = self.states.lock().await;

			states.remove(&state)
		};

		if !recorded.is_some_and(|login| login.session_id == session_id) {
			return Err(Error::InvalidRequest("invalid state"));
		}

		let tokens = self.exchange_code(&code).await?;

		self.verifier.verify(&tokens.access_token, &self.config.client_id)
	}

	/// Start periodically sweeping expired login states.
	///
	/// The sweep bounds memory and narrows the replay window; callback
	/// validation does not depend on it. Starting while a schedule is
	/// already running replaces it.
	pub async fn start_auto_cleanup(&self, interval: Duration) {
		let client = self.clone();
		let handle = tokio::spawn(async move {
			let mut ticker = time::interval(interval);

			// The first tick completes immediately.
			ticker.tick().await;

			loop {
				ticker.tick().await;
				client.sweep_expired().await;
			}
		});
		let mut cleanup = self.cleanup.lock().await;

		if let Some(previous) = cleanup.replace(handle) {
			previous.abort();
		}
	}

	/// Stop a previously started cleanup schedule; a no-op when idle.
	pub async fn stop_auto_cleanup(&self) {
		if let Some(handle) = self.cleanup.lock().await.take() {
			handle.abort();
		}
	}

	/// Remove every login state whose age exceeds the configured timeout.
	async fn sweep_expired(&self) {
		let timeout = self.config.state_timeout;
		let now = Instant::now();
		let mut states = self.states.lock().await;
		let before = states.len();

		states.retain(|_, state| now.duration_since(state.created_at) <= timeout);

		let swept = before - states.len();

		if swept > 0 {
			tracing::debug!(swept, "removed expired login states");
		}
	}

	async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
		let response = self
			.http
			.post(self.config.token_url.clone())
			.basic_auth(&self.config.client_id, Some(&self.config.client_secret))
			.form(&[("grant_type", "authorization_code"), ("code", code)])
			.send()
			.await?;
		let status = response.status();

		if !status.is_success() {
			let body = response.text().await.ok();

			return Err(Error::UpstreamAuth { status, body });
		}

		let bytes = response.bytes().await?;

		tracing::debug!("code exchange complete");

		Ok(serde_json::from_slice(&bytes)?)
	}
}

fn default_state_timeout() -> Duration {
	DEFAULT_STATE_TIMEOUT
}

fn first_query_value(url: &Url, name: &str) -> Option<String> {
	url.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
}

fn state_token() -> String {
	let bytes: [u8; 16] = rand::rng().random();

	BASE64_URL_SAFE_NO_PAD.encode(bytes)
}
