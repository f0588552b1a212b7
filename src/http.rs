//! HTTP transport for the Spotify Web API and the OAuth callback.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Consistent timeouts and headers
//! * Bearer authentication
//! * An outbound URL filter that keeps analytics traffic off the network
//!
//! Rate limiting is not done here: the [`api`](crate::api) client gates its
//! own calls, while logout round trips and filtered URLs are not counted.
//!
//! # Example
//!
//! ```rust
//! use playhost::http::{Client, Request, Transport};
//!
//! let client = Client::new(&config)?;
//! let request = Request::new(Method::GET, url).with_bearer(token);
//! let response = client.send(request).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use url::Url;

use crate::{config::Config, error::Result, token::AccessToken};

/// Outbound request, independent of the HTTP client implementation.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub bearer: Option<AccessToken>,
    /// JSON body, if any.
    pub body: Option<String>,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            bearer: None,
            body: None,
        }
    }

    #[must_use]
    pub fn with_bearer(mut self, token: AccessToken) -> Self {
        self.bearer = Some(token);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status and body text of a completed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub body: String,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, String::new())
    }
}

/// Anything that can carry a [`Request`] to a server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// Deny list over outbound URLs.
///
/// The playback service's telemetry endpoints fail often and noisily.
/// Requests to URLs containing any of the patterns are answered locally
/// with `204 No Content` and never leave the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlFilter {
    deny: Vec<String>,
}

impl UrlFilter {
    #[must_use]
    pub fn new<I, S>(deny: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deny: deny.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn allows(&self, url: &Url) -> bool {
        let url = url.as_str();
        !self.deny.iter().any(|pattern| url.contains(pattern.as_str()))
    }
}

impl Default for UrlFilter {
    fn default() -> Self {
        Self::new(["cpapi.spotify.com", "event/item_before_load"])
    }
}

/// HTTP client with consistent configuration and URL filtering.
pub struct Client {
    inner: reqwest::Client,
    filter: UrlFilter,
}

impl Client {
    /// Duration to keep idle connections alive.
    ///
    /// Prevents frequent reconnection overhead between polls.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// `Content-Type` of request bodies.
    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built, for example when the
    /// TLS backend fails to initialize.
    pub fn new(config: &Config) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            inner,
            filter: config.url_filter.clone(),
        })
    }

    #[must_use]
    pub fn filter(&self) -> &UrlFilter {
        &self.filter
    }
}

#[async_trait]
impl Transport for Client {
    async fn send(&self, request: Request) -> Result<Response> {
        if !self.filter.allows(&request.url) {
            debug!("suppressed request to {}", request.url.path());
            return Ok(Response::no_content());
        }

        let mut builder = self.inner.request(request.method, request.url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, Self::JSON_CONTENT).body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(Response { status, body })
    }
}
