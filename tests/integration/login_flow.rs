//! Integration coverage for the OAuth2 login handshake.

// std
use std::time::{SystemTime, UNIX_EPOCH};
// crates.io
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde::Serialize;
use sso_gate::{Error, JwtVerifier, Result, SsoClient, SsoClientConfig};
use url::Url;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_string_contains, method, path},
};

const CLIENT_ID: &str = "ping-board";
const HMAC_SECRET: &[u8] = b"integration-test-secret";

#[derive(Serialize)]
struct Claims {
	sub: String,
	name: String,
	aud: String,
	scp: Vec<String>,
	exp: u64,
}

fn signed_identity_token(secret: &[u8]) -> String {
	let exp = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock").as_secs() + 3600;
	let claims = Claims {
		sub: "PRINCIPAL:2112625428".into(),
		name: "Ada".into(),
		aud: CLIENT_ID.into(),
		scp: vec!["publicData".into()],
		exp,
	};

	jsonwebtoken::encode(
		&Header::new(Algorithm::HS256),
		&claims,
		&EncodingKey::from_secret(secret),
	)
	.expect("token")
}

fn sso_client(server_uri: &str) -> SsoClient {
	let config = SsoClientConfig {
		client_id: CLIENT_ID.into(),
		client_secret: "client-secret".into(),
		redirect_uri: Url::parse("http://localhost/auth/callback").expect("url"),
		authorize_url: Url::parse(&format!("{server_uri}/v2/oauth/authorize")).expect("url"),
		token_url: Url::parse(&format!("{server_uri}/v2/oauth/token")).expect("url"),
		scopes: Vec::new(),
		state_timeout: std::time::Duration::from_secs(300),
	};
	let verifier = JwtVerifier::new(DecodingKey::from_secret(HMAC_SECRET), Algorithm::HS256);

	SsoClient::new(config, verifier).expect("sso client")
}

fn state_of(login_url: &Url) -> String {
	login_url
		.query_pairs()
		.find(|(key, _)| key == "state")
		.map(|(_, value)| value.into_owned())
		.expect("state parameter")
}

fn callback(state: &str) -> Url {
	Url::parse(&format!("http://localhost/auth/callback?code=abc123&state={state}"))
		.expect("callback url")
}

#[tokio::test]
async fn login_handshake_succeeds_exactly_once() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let token = signed_identity_token(HMAC_SECRET);

	Mock::given(method("POST"))
		.and(path("/v2/oauth/token"))
		.and(body_string_contains("grant_type=authorization_code"))
		.and(body_string_contains("code=abc123"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"access_token": token,
			"token_type": "Bearer",
			"expires_in": 1199,
		})))
		.expect(1)
		.mount(&server)
		.await;

	let client = sso_client(&server.uri());
	let login_url = client.start_login("session-1").await?;
	let state = state_of(&login_url);
	let identity = client.handle_callback("session-1", &callback(&state)).await?;

	assert_eq!(identity.subject, "PRINCIPAL:2112625428");
	assert_eq!(identity.name.as_deref(), Some("Ada"));
	assert_eq!(identity.scopes, vec!["publicData".to_string()]);

	// The state token is single-use; a replay with the same token and the
	// same session must fail without reaching the token endpoint again.
	assert!(matches!(
		client.handle_callback("session-1", &callback(&state)).await,
		Err(Error::InvalidRequest(_))
	));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn callback_for_a_different_session_never_reaches_the_provider() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/v2/oauth/token"))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&server)
		.await;

	let client = sso_client(&server.uri());
	let login_url = client.start_login("session-a").await?;
	let state = state_of(&login_url);

	assert!(matches!(
		client.handle_callback("session-b", &callback(&state)).await,
		Err(Error::InvalidRequest(_))
	));

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn rejected_code_exchange_surfaces_as_upstream_auth_error() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/v2/oauth/token"))
		.respond_with(
			ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
		)
		.expect(1)
		.mount(&server)
		.await;

	let client = sso_client(&server.uri());
	let login_url = client.start_login("session-1").await?;
	let state = state_of(&login_url);

	match client.handle_callback("session-1", &callback(&state)).await {
		Err(Error::UpstreamAuth { status, body }) => {
			assert_eq!(status.as_u16(), 400);
			assert!(body.unwrap_or_default().contains("invalid_grant"));
		},
		other => panic!("expected upstream auth error, got {other:?}"),
	}

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn identity_token_with_a_bad_signature_is_rejected() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let token = signed_identity_token(b"some-other-secret");

	Mock::given(method("POST"))
		.and(path("/v2/oauth/token"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"access_token": token,
			"token_type": "Bearer",
			"expires_in": 1199,
		})))
		.expect(1)
		.mount(&server)
		.await;

	let client = sso_client(&server.uri());
	let login_url = client.start_login("session-1").await?;
	let state = state_of(&login_url);

	assert!(matches!(
		client.handle_callback("session-1", &callback(&state)).await,
		Err(Error::TokenVerification(_))
	));

	server.verify().await;
	Ok(())
}
