//! Group membership lookup client and its TTL-cached resolver.

// std
use std::future::Future;
// crates.io
use base64::prelude::*;
use reqwest::{Client, StatusCode, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{Loader, TtlCache},
	retry::RetryPolicy,
};

/// Configuration for the group lookup service client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupClientConfig {
	/// Base URL of the group lookup application API.
	pub base_url: Url,
	/// Application identifier issued by the lookup service.
	pub app_id: String,
	/// Application token issued by the lookup service.
	pub app_token: String,
}

/// A group as reported by the lookup service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupRecord {
	/// Group name.
	pub name: String,
}

/// Registration info of the lookup application itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppInfo {
	/// Application name.
	pub name: String,
	/// Groups the application is allowed to see.
	#[serde(default)]
	pub groups: Vec<GroupRecord>,
}

/// HTTP client for the external group lookup API.
#[derive(Clone, Debug)]
pub struct GroupClient {
	base_url: String,
	auth_header: String,
	http: Client,
}
impl GroupClient {
	/// Build a new client with the default reqwest client.
	pub fn new(config: GroupClientConfig) -> Result<Self> {
		let http = Client::builder()
			.user_agent(format!("sso-gate/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self::with_client(config, http))
	}

	/// Build a client using the supplied HTTP client (primarily for tests).
	pub fn with_client(config: GroupClientConfig, http: Client) -> Self {
		// Strip trailing slashes off the base URL, just in case.
		let base_url = config.base_url.as_str().trim_end_matches('/').to_string();
		let bearer = BASE64_STANDARD.encode(format!("{}:{}", config.app_id, config.app_token));

		Self { base_url, auth_header: format!("Bearer {bearer}"), http }
	}

	/// Query a principal's group memberships.
	///
	/// A 404 from the lookup service maps to [`Error::PrincipalUnknown`].
	pub async fn lookup_groups(&self, principal: u64) -> Result<Vec<GroupRecord>> {
		match self.get_json(&format!("/app/v2/groups/{principal}")).await {
			Err(Error::UpstreamStatus { status, .. }) if status == StatusCode::NOT_FOUND =>
				Err(Error::PrincipalUnknown { principal }),
			other => other,
		}
	}

	/// Fetch the lookup application's own registration info, including the
	/// groups visible to it.
	pub async fn app_info(&self) -> Result<AppInfo> {
		self.get_json("/app/v1/show").await
	}

	async fn get_json<T>(&self, path: &str) -> Result<T>
	where
		T: serde::de::DeserializeOwned,
	{
		let url = Url::parse(&format!("{}{path}", self.base_url))?;
		let response =
			self.http.get(url.clone()).header(AUTHORIZATION, &self.auth_header).send().await?;
		let status = response.status();

		if !status.is_success() {
			let body = response.text().await.ok();

			return Err(Error::UpstreamStatus { status, url, body });
		}

		let bytes = response.bytes().await?;

		Ok(serde_json::from_slice(&bytes)?)
	}
}
impl Loader<u64, Vec<String>> for GroupClient {
	fn load(&self, key: &u64) -> impl Future<Output = Result<Vec<String>>> + Send {
		let principal = *key;

		async move {
			tracing::debug!(principal, "fetching groups from lookup service");

			let groups = self.lookup_groups(principal).await?;

			Ok(groups.into_iter().map(|group| group.name).collect())
		}
	}
}

/// Resolves a principal's group names through the resilient TTL cache.
///
/// This is the sole read path for group membership data inside the
/// application; going through it preserves the single-flight and TTL
/// guarantees application-wide.
#[derive(Debug)]
pub struct GroupResolver {
	cache: TtlCache<u64, Vec<String>, GroupClient>,
}
impl GroupResolver {
	/// Build a resolver with the default retry policy.
	pub fn new(client: GroupClient, cache_ttl: Duration) -> Result<Self> {
		Self::with_retry_policy(client, cache_ttl, RetryPolicy::default())
	}

	/// Build a resolver with an explicit retry policy.
	pub fn with_retry_policy(
		client: GroupClient,
		cache_ttl: Duration,
		retry_policy: RetryPolicy,
	) -> Result<Self> {
		Ok(Self { cache: TtlCache::new(client, cache_ttl, retry_policy)? })
	}

	/// Resolve the principal's current group names.
	#[tracing::instrument(skip(self))]
	pub async fn get_groups(&self, principal: u64, force_refresh: bool) -> Result<Vec<String>> {
		self.cache.get(principal, force_refresh).await
	}
}
