//! Session transport: the only component that talks to the portal.
//!
//! [`Transport`] is the seam between the pipeline and the network. The real
//! implementation is [`client::PortalClient`] (cookie-bearing reqwest client);
//! [`mockup::MockupTransport`] serves canned responses from disk for dry runs.

pub mod client;
pub mod cookies;
pub mod mockup;

use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt;

pub use client::{ClientOptions, PortalClient};
pub use cookies::{CookieJar, StoredCookie};
pub use mockup::MockupTransport;

/// HTTP method of a portal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    None,
    /// `application/x-www-form-urlencoded`, pairs sent in order.
    Form(Vec<(String, String)>),
    /// `application/json`, already serialized.
    Json(String),
}

/// A single call to the portal.
#[derive(Debug, Clone)]
pub struct PortalRequest {
    pub method: Method,
    pub url: String,
    pub body: RequestBody,
    pub headers: Vec<(String, String)>,
}

impl PortalRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: RequestBody::None,
            headers: Vec::new(),
        }
    }

    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: RequestBody::Form(fields),
            headers: Vec::new(),
        }
    }

    pub fn post_json(url: impl Into<String>, json: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: RequestBody::Json(json.into()),
            headers: vec![("Content-Type".into(), "application/json".into())],
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Cookie-bearing access to the portal.
///
/// HTTP error statuses are not failures: the body is returned either way,
/// because the portal reports business errors in 200 and 4xx bodies alike.
/// Only network, TLS, and local I/O problems surface as [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, req: PortalRequest) -> Result<String, TransportError>;

    /// Inter-request delay applied before a paced call. No-op by default.
    async fn pace(&self) {}

    async fn get(&self, url: &str) -> Result<String, TransportError> {
        self.request(PortalRequest::get(url)).await
    }

    async fn post_form(
        &self,
        url: &str,
        fields: Vec<(String, String)>,
    ) -> Result<String, TransportError> {
        self.request(PortalRequest::post_form(url, fields)).await
    }

    async fn post_json(&self, url: &str, json: &str) -> Result<String, TransportError> {
        self.request(PortalRequest::post_json(url, json)).await
    }
}

/// Portal endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Portal {
    host: String,
}

impl Default for Portal {
    fn default() -> Self {
        Self::new(Portal::DEFAULT_HOST)
    }
}

impl Portal {
    pub const DEFAULT_HOST: &'static str = "https://marangatu.set.gov.py";

    /// Marker present on every page served to an authenticated session.
    pub const LOGOUT_MARKER: &'static str = "/eset/logout";

    pub fn new(host: impl Into<String>) -> Self {
        let host: String = host.into();
        Self {
            host: host.trim_end_matches('/').to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Application root, `{host}/eset`.
    pub fn base(&self) -> String {
        format!("{}/eset", self.host)
    }

    /// `{base}/{path}`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base(), path.trim_start_matches('/'))
    }

    /// `{base}/{path}?t3={token}`.
    pub fn tokenized(&self, path: &str, token: &str) -> String {
        format!("{}?t3={}", self.endpoint(path), token)
    }

    /// Host-relative link, `{host}{link}`.
    pub fn on_host(&self, link: &str) -> String {
        format!("{}{}", self.host, link)
    }

    pub fn authenticate(&self) -> String {
        self.endpoint("authenticate")
    }

    /// Login page as served after a failed captcha check.
    pub fn login_page(&self, username: &str) -> String {
        format!(
            "{}/eset/login?login_error=2&usuario={}",
            self.host,
            crate::codec::quote(username)
        )
    }
}
