//! Cookie-bearing HTTP client for the portal, wrapping reqwest.
//!
//! Not a browser: no JavaScript, no rendering. One client per process with a
//! user-agent picked at random once, a configurable TLS policy, the shared
//! [`CookieJar`], and a randomized pause before paced calls so the portal's
//! abuse detection does not trip.

use super::cookies::CookieJar;
use super::{PortalRequest, RequestBody, Transport};
use crate::error::TransportError;
use crate::progress::WaitSpinner;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// User-agent used when no list file is available.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/120.0.0.0 Safari/537.36";

/// Transport settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Verify the server certificate. Off by default: the portal's chain does
    /// not validate against standard roots. Turning verification off exposes
    /// the session to interception; enable it whenever the portal allows.
    pub verify_tls: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Inclusive range, in whole seconds, of the pause before paced calls.
    pub delay_secs: (u64, u64),
    /// Netscape cookie file loaded at start and rewritten after each call.
    pub cookie_file: Option<PathBuf>,
    /// One user-agent per line; a random line is used for the whole run.
    pub user_agents_file: Option<PathBuf>,
    /// Show a terminal spinner during the pause.
    pub progress: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            verify_tls: false,
            timeout: Duration::from_secs(60),
            delay_secs: (1, 4),
            cookie_file: None,
            user_agents_file: None,
            progress: false,
        }
    }
}

/// Pick a random non-blank line from a user-agent list, or the default.
pub fn choose_user_agent(file: Option<&Path>) -> String {
    let Some(path) = file else {
        return DEFAULT_USER_AGENT.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let agents: Vec<&str> = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            agents
                .choose(&mut rand::thread_rng())
                .map(|ua| ua.to_string())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
        }
        Err(e) => {
            if path.exists() {
                warn!(path = %path.display(), error = %e, "could not read user agents");
            }
            DEFAULT_USER_AGENT.to_string()
        }
    }
}

/// Real network transport.
pub struct PortalClient {
    client: reqwest::Client,
    jar: Arc<CookieJar>,
    user_agent: String,
    options: ClientOptions,
}

impl PortalClient {
    /// Build the client, loading persisted cookies if configured.
    pub fn new(options: ClientOptions) -> Result<Self, TransportError> {
        let jar = match &options.cookie_file {
            Some(path) => match CookieJar::load(path) {
                Ok(jar) => jar,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not load cookies");
                    CookieJar::new()
                }
            },
            None => CookieJar::new(),
        };
        Self::with_jar(options, Arc::new(jar))
    }

    /// Build the client around an existing jar.
    pub fn with_jar(options: ClientOptions, jar: Arc<CookieJar>) -> Result<Self, TransportError> {
        let user_agent = choose_user_agent(options.user_agents_file.as_deref());

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(user_agent.as_str())
            .default_headers(headers)
            .cookie_provider(Arc::clone(&jar))
            .danger_accept_invalid_certs(!options.verify_tls)
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        debug!(user_agent = %user_agent, verify_tls = options.verify_tls, "portal client ready");

        Ok(Self {
            client,
            jar,
            user_agent,
            options,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    /// Write the jar to the cookie file. Failures are logged, never raised.
    pub async fn persist_cookies(&self) {
        if let Some(path) = &self.options.cookie_file {
            if let Err(e) = self.jar.save(path).await {
                warn!(path = %path.display(), error = %e, "could not save cookies");
            }
        }
    }
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn decoded(url: &str) -> String {
    percent_encoding::percent_decode_str(url)
        .decode_utf8_lossy()
        .into_owned()
}

#[async_trait]
impl Transport for PortalClient {
    async fn request(&self, req: PortalRequest) -> Result<String, TransportError> {
        debug!("{} {}", req.method, decoded(&req.url));

        let mut builder = match req.method {
            super::Method::Get => self.client.get(&req.url),
            super::Method::Post => self.client.post(&req.url),
        };

        for (name, value) in &req.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => builder = builder.header(n, v),
                _ => warn!(header = %name, "dropping invalid header"),
            }
        }

        builder = match req.body {
            RequestBody::None => builder,
            RequestBody::Form(fields) => {
                debug!(fields = fields.len(), "form body");
                builder.form(&fields)
            }
            RequestBody::Json(json) => {
                debug!("data: {}", preview(&json));
                builder.body(json)
            }
        };

        let http_err = |source| TransportError::Http {
            url: req.url.clone(),
            source,
        };

        let resp = builder.send().await.map_err(http_err)?;
        let status = resp.status();
        if !status.is_success() {
            // The portal reports business failures in error bodies too.
            debug!(status = status.as_u16(), "non-success status, returning body");
        }
        let body = resp.text().await.map_err(http_err)?;

        self.persist_cookies().await;
        Ok(body)
    }

    async fn pace(&self) {
        let (lo, hi) = self.options.delay_secs;
        if hi == 0 {
            return;
        }
        let secs = rand::thread_rng().gen_range(lo.min(hi)..=hi);
        debug!(secs, "pausing before request");
        let _spinner = WaitSpinner::start(
            self.options.progress,
            format!("Waiting {secs}s before the next request"),
        );
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}
