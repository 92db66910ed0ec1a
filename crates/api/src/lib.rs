//! QuickSite management API client.
//!
//! A thin wrapper around a configured `reqwest::Client` for talking to a
//! QuickSite installation's `/management` endpoint. It covers:
//!
//! - Constructing an HTTP client with bearer authentication and JSON headers
//! - Validating the management base URL for safety
//! - Building requests with a consistent User-Agent
//! - Sending a request and returning the raw `(status, body)` pair
//!
//! The primary entry point is [`ManagementClient`]. Create an instance via
//! [`ManagementClient::new`] (or [`ManagementClient::from_env`]) and send
//! requests with [`ManagementClient::send`]. Response classification — what
//! counts as success, how non-JSON bodies are reported — is the executor's
//! concern, not the client's.

use std::env;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Url, header};
use thiserror::Error;
use tracing::debug;

/// Environment variable holding the management base URL.
pub const API_BASE_ENV: &str = "QUICKSITE_API_BASE";
/// Environment variable holding the bearer token.
pub const API_TOKEN_ENV: &str = "QUICKSITE_API_TOKEN";

/// Hostnames allowed with any scheme for local development.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Errors surfaced while building the client or sending a request.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid management base URL '{base}': {reason}")]
    InvalidBaseUrl { base: String, reason: String },
    #[error("no authentication token; set {API_TOKEN_ENV} or pass one explicitly")]
    MissingToken,
    #[error("authentication token contains characters not valid in a header")]
    MalformedToken,
    #[error("could not build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("network error: {0}")]
    Transport(#[source] reqwest::Error),
}

/// Raw outcome of one management API call: the HTTP status line and the
/// unparsed body text.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Thin wrapper around a configured `reqwest::Client` for management API
/// access.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    base_url: String,
    http: Client,
    user_agent: String,
}

impl ManagementClient {
    /// Construct a client for an explicit base URL and bearer token.
    ///
    /// The base URL must be HTTPS unless it points at localhost. The token is
    /// installed as a default `Authorization: Bearer` header, alongside
    /// `Content-Type: application/json`.
    pub fn new(base_url: &str, auth_token: &str, timeout: Duration) -> Result<Self, ClientError> {
        if auth_token.trim().is_empty() {
            return Err(ClientError::MissingToken);
        }
        validate_base_url(base_url)?;

        let mut default_headers = header::HeaderMap::new();
        let bearer = format!("Bearer {}", auth_token);
        let auth_value = header::HeaderValue::from_str(&bearer).map_err(|_| ClientError::MalformedToken)?;
        default_headers.insert(header::AUTHORIZATION, auth_value);
        default_headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            user_agent: format!("quicksite-pipeline/0.1; {}", env::consts::OS),
        })
    }

    /// Construct a client from `QUICKSITE_API_BASE` and `QUICKSITE_API_TOKEN`.
    pub fn from_env(timeout: Duration) -> Result<Self, ClientError> {
        let base_url = env::var(API_BASE_ENV).map_err(|_| ClientError::InvalidBaseUrl {
            base: String::new(),
            reason: format!("{API_BASE_ENV} is not set"),
        })?;
        let token = env::var(API_TOKEN_ENV).map_err(|_| ClientError::MissingToken)?;
        Self::new(&base_url, &token, timeout)
    }

    /// The validated base URL this client targets.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a `reqwest::RequestBuilder` for a method and API-relative path.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, %method, "building request");

        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }

    /// Send a request and collect the raw status + body text.
    ///
    /// Only transport failures are errors here; any HTTP status comes back
    /// in [`RawResponse`] for the caller to classify.
    pub async fn send(&self, method: Method, path: &str, body: Option<&serde_json::Value>) -> Result<RawResponse, ClientError> {
        let mut builder = self.request(method, path);
        if let Some(json_body) = body {
            builder = builder.json(json_body);
        }

        let response = builder.send().await.map_err(ClientError::Transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(ClientError::Transport)?;
        Ok(RawResponse { status, body })
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
fn validate_base_url(base: &str) -> Result<(), ClientError> {
    let parsed = Url::parse(base).map_err(|e| ClientError::InvalidBaseUrl {
        base: base.to_string(),
        reason: e.to_string(),
    })?;

    let host_name = parsed.host_str().ok_or_else(|| ClientError::InvalidBaseUrl {
        base: base.to_string(),
        reason: "URL must include a host".into(),
    })?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(());
    }

    if parsed.scheme() != "https" {
        return Err(ClientError::InvalidBaseUrl {
            base: base.to_string(),
            reason: format!("non-localhost hosts must use https, got '{}://'", parsed.scheme()),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_localhost_http() {
        assert!(validate_base_url("http://localhost:8080/management").is_ok());
        assert!(validate_base_url("http://127.0.0.1/management").is_ok());
    }

    #[test]
    fn rejects_plain_http_for_remote_hosts() {
        let err = validate_base_url("http://example.com/management").expect_err("http remote must fail");
        assert!(matches!(err, ClientError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn accepts_https_remote_hosts() {
        assert!(validate_base_url("https://mysite.example/management").is_ok());
    }

    #[test]
    fn rejects_url_without_host() {
        assert!(validate_base_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn client_requires_token() {
        let err = ManagementClient::new("http://localhost/management", "  ", Duration::from_secs(5)).expect_err("blank token");
        assert!(matches!(err, ClientError::MissingToken));
    }

    #[test]
    fn client_strips_trailing_slash() {
        let client = ManagementClient::new("http://localhost/management/", "tok", Duration::from_secs(5)).expect("client builds");
        assert_eq!(client.base_url(), "http://localhost/management");
    }

    #[test]
    fn rejects_token_with_control_characters() {
        let err = ManagementClient::new("http://localhost/management", "bad\ntoken", Duration::from_secs(5)).expect_err("newline token");
        assert!(matches!(err, ClientError::MalformedToken));
    }
}
