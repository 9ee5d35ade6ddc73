//! HTTP fetcher implementation
//!
//! Each attempt is a single GET presenting the identity's user agent, derived
//! headers and stored cookies. Responses are classified as follows:
//!
//! | Condition | Result |
//! |-----------|--------|
//! | HTTP 2xx | Success |
//! | HTTP 408, 429, 5xx | Retryable failure |
//! | Other HTTP status | Fatal failure |
//! | Timeout | Retryable timeout |
//! | Connection error | Retryable failure |
//! | Unparseable or non-HTTP target | Invalid target |

use super::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::identity::Cookie;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Maximum redirect hops followed per attempt
const MAX_REDIRECTS: usize = 10;

/// Builds the shared HTTP client
///
/// No default user agent is set; every request carries the one belonging to
/// its identity. Every encoding named in an identity's `Accept-Encoding`
/// header must be decoded here.
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
}

/// [`Fetcher`] backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_http_client()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = parse_target(&request.target)?;
        let timeout = request.timeout;

        let mut builder = self
            .client
            .get(url)
            .timeout(timeout)
            .header(USER_AGENT, request.identity.fingerprint.user_agent.as_str());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(cookie) = request.identity.cookie_header() {
            builder = builder.header(COOKIE, cookie);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(e, timeout))?;

        let status = response.status();
        let cookies = collect_cookies(response.headers());

        if !status.is_success() {
            return Err(FetchError::status(
                status.as_u16(),
                is_retryable_status(status),
                status.canonical_reason().unwrap_or("Unexpected status"),
            ));
        }

        let payload = response
            .text()
            .await
            .map_err(|e| classify_transport_error(e, timeout))?;

        Ok(FetchResponse {
            status_code: Some(status.as_u16()),
            payload,
            cookies,
        })
    }
}

fn parse_target(target: &str) -> Result<Url, FetchError> {
    let url = Url::parse(target.trim())
        .map_err(|e| FetchError::InvalidTarget(format!("{}: {}", target, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(FetchError::InvalidTarget(format!(
            "{}: unsupported scheme '{}'",
            target, scheme
        ))),
    }
}

/// Returns true for statuses worth another attempt
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn classify_transport_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout { after: timeout }
    } else if err.is_connect() {
        FetchError::retryable(format!("Connection failed: {}", err))
    } else if err.is_builder() {
        FetchError::fatal(format!("Malformed request: {}", err))
    } else if err.is_redirect() || err.is_decode() {
        FetchError::fatal(err.to_string())
    } else {
        FetchError::retryable(err.to_string())
    }
}

fn collect_cookies(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_set_cookie)
        .collect()
}

/// Parses the name, value, domain and path out of a `Set-Cookie` value
fn parse_set_cookie(header: &str) -> Option<Cookie> {
    let mut parts = header.split(';').map(str::trim);
    let (name, value) = parts.next()?.split_once('=')?;
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie::new(name, value);
    for attribute in parts {
        let Some((key, val)) = attribute.split_once('=') else {
            continue;
        };
        if key.eq_ignore_ascii_case("domain") {
            cookie.domain = Some(val.to_string());
        } else if key.eq_ignore_ascii_case("path") {
            cookie.path = Some(val.to_string());
        }
    }

    Some(cookie)
}
