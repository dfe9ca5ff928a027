//! Swift transport over `reqwest`.
//!
//! Resolves account-relative paths against the configured account URL
//! and attaches the `X-Auth-Token` header.  Request bodies are streamed
//! (chunked unless the caller set `Content-Length`); response bodies are
//! handed back unread.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::TryStreamExt;
use tracing::{debug, info};

use super::{cluster_root, Endpoint, Transport, TransportRequest, TransportResponse};
use crate::config::SwiftConfig;
use crate::errors::Result;

/// Header carrying the pre-acquired auth token.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Transport that forwards requests to a real Swift endpoint.
pub struct HttpTransport {
    /// HTTP client (connection pool, timeouts).
    client: reqwest::Client,
    /// Account URL without trailing slash.
    account_url: String,
    /// Token sent with every request, if any.
    auth_token: Option<String>,
}

impl HttpTransport {
    /// Create a transport for `account_url` with a default client.
    pub fn new(account_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self::with_client(client, account_url, auth_token))
    }

    /// Create a transport around an existing client.
    pub fn with_client(
        client: reqwest::Client,
        account_url: impl Into<String>,
        auth_token: Option<String>,
    ) -> Self {
        let account_url = account_url.into().trim_end_matches('/').to_string();
        info!(
            "Swift HTTP transport initialized: account_url={} token={}",
            account_url,
            if auth_token.is_some() { "set" } else { "none" }
        );
        Self {
            client,
            account_url,
            auth_token,
        }
    }

    /// Build a transport from the `swift` config section.
    pub fn from_config(config: &SwiftConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::with_client(
            client,
            config.storage_url.clone(),
            config.resolve_auth_token(),
        ))
    }

    /// Full URL for a path relative to `endpoint`.
    fn url(&self, endpoint: Endpoint, path: &str) -> String {
        match endpoint {
            Endpoint::Account => format!("{}{}", self.account_url, path),
            Endpoint::Cluster => format!("{}{}", cluster_root(&self.account_url), path),
        }
    }
}

impl Transport for HttpTransport {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + '_>> {
        Box::pin(async move {
            let url = self.url(request.endpoint, &request.path);
            debug!("Swift HTTP {} {}", request.method, url);

            let mut req = self
                .client
                .request(request.method, &url)
                .headers(request.headers);
            if !request.query.is_empty() {
                req = req.query(&request.query);
            }
            if let Some(token) = &self.auth_token {
                req = req.header(AUTH_TOKEN_HEADER, token);
            }
            if let Some(body) = request.body {
                req = req.body(reqwest::Body::wrap_stream(body));
            }

            let resp = req.send().await?;
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp.bytes_stream().map_err(std::io::Error::other);

            Ok(TransportResponse {
                status,
                headers,
                body: Box::pin(body),
            })
        })
    }

    fn account_url(&self) -> &str {
        &self.account_url
    }
}
