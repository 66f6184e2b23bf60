//! Cookie jar shared with the HTTP client and persisted in Netscape format.
//!
//! The jar is the single source of authentication state. It implements
//! [`reqwest::cookie::CookieStore`], so the client sends and captures
//! cookies on every call; [`CookieJar::save`] writes the browser-compatible
//! `cookies.txt` layout (tab-separated, `#HttpOnly_` prefix for HTTP-only
//! cookies) that curl, wget and the Python cookie jar all read.

use reqwest::header::HeaderValue;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::RwLock;
use url::Url;

const HEADER: &str = "# Netscape HTTP Cookie File\n\
                      # http://curl.haxx.se/rfc/cookie_spec.html\n\
                      # This is a generated file!  Do not edit.\n\n";

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// One cookie as stored in the jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    /// Host for host-only cookies, `.domain` when subdomains are included.
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Unix seconds; `None` for session cookies.
    pub expires: Option<i64>,
    pub name: String,
    pub value: String,
}

impl StoredCookie {
    fn same_slot(&self, other: &StoredCookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    fn is_expired(&self, now: i64) -> bool {
        self.expires.is_some_and(|exp| exp != 0 && exp <= now)
    }

    fn matches_host(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        if self.include_subdomains {
            host.eq_ignore_ascii_case(domain)
                || host
                    .to_ascii_lowercase()
                    .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
        } else {
            host.eq_ignore_ascii_case(domain)
        }
    }

    fn matches_path(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        request_path.starts_with(&self.path)
            && (self.path.ends_with('/')
                || request_path.as_bytes().get(self.path.len()) == Some(&b'/'))
    }

    fn to_line(&self) -> String {
        let domain = if self.http_only {
            format!("{HTTP_ONLY_PREFIX}{}", self.domain)
        } else {
            self.domain.clone()
        };
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            domain,
            bool_field(self.include_subdomains),
            self.path,
            bool_field(self.secure),
            self.expires.map(|e| e.to_string()).unwrap_or_default(),
            self.name,
            self.value
        )
    }

    fn from_line(line: &str) -> Option<Self> {
        let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (rest, true),
            None => (line, false),
        };
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 6 {
            return None;
        }
        let expires = match fields[4].trim() {
            "" | "0" => None,
            raw => Some(raw.parse::<i64>().ok()?),
        };
        Some(Self {
            domain: fields[0].to_string(),
            include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            http_only,
            expires,
            name: fields[5].to_string(),
            value: fields.get(6).map(|v| v.to_string()).unwrap_or_default(),
        })
    }
}

fn bool_field(flag: bool) -> &'static str {
    if flag {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Default cookie path for a request path (RFC 6265 §5.1.4).
fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Thread-safe cookie jar.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<StoredCookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a Netscape cookie file. A missing file yields an empty jar.
    ///
    /// Expired and session cookies are kept; the portal decides what it accepts.
    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Parse Netscape cookie-file text, skipping comments and malformed lines.
    pub fn parse(text: &str) -> Self {
        let cookies = text
            .lines()
            .map(str::trim_end)
            .filter(|line| {
                !line.is_empty() && (!line.starts_with('#') || line.starts_with(HTTP_ONLY_PREFIX))
            })
            .filter_map(StoredCookie::from_line)
            .collect();
        Self {
            cookies: RwLock::new(cookies),
        }
    }

    /// Render the jar in Netscape cookie-file format.
    pub fn to_netscape(&self) -> String {
        let mut out = String::from(HEADER);
        for cookie in self.snapshot() {
            out.push_str(&cookie.to_line());
            out.push('\n');
        }
        out
    }

    /// Write the jar to `path`, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> io::Result<()> {
        let text = self.to_netscape();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, text).await
    }

    /// Copy of all cookies in insertion order.
    pub fn snapshot(&self) -> Vec<StoredCookie> {
        match self.cookies.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace the cookie with the same name, domain and path.
    pub fn insert(&self, cookie: StoredCookie) {
        let mut guard = match self.cookies.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.iter_mut().find(|c| c.same_slot(&cookie)) {
            Some(slot) => *slot = cookie,
            None => guard.push(cookie),
        }
    }

    fn remove_slot(&self, cookie: &StoredCookie) {
        let mut guard = match self.cookies.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.retain(|c| !c.same_slot(cookie));
    }

    /// Record one `Set-Cookie` header received from `url`.
    pub fn store_set_cookie(&self, header: &str, url: &Url) {
        let Ok(parsed) = cookie::Cookie::parse(header.to_string()) else {
            tracing::debug!(header, "ignoring unparseable Set-Cookie");
            return;
        };
        let Some(host) = url.host_str() else {
            return;
        };

        let (domain, include_subdomains) = match parsed.domain() {
            Some(d) if !d.is_empty() => {
                let d = d.trim_start_matches('.').to_ascii_lowercase();
                let host_lc = host.to_ascii_lowercase();
                if host_lc != d && !host_lc.ends_with(&format!(".{d}")) {
                    tracing::debug!(domain = %d, host, "rejecting cookie for foreign domain");
                    return;
                }
                (format!(".{d}"), true)
            }
            _ => (host.to_ascii_lowercase(), false),
        };

        let path = match parsed.path() {
            Some(p) if p.starts_with('/') => p.to_string(),
            _ => default_path(url.path()),
        };

        let now = now_unix();
        let expires = match parsed.max_age() {
            Some(age) => Some(now + age.whole_seconds()),
            None => parsed.expires_datetime().map(|t| t.unix_timestamp()),
        };

        let stored = StoredCookie {
            domain,
            include_subdomains,
            path,
            secure: parsed.secure().unwrap_or(false),
            http_only: parsed.http_only().unwrap_or(false),
            expires,
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
        };

        if stored.is_expired(now) {
            self.remove_slot(&stored);
        } else {
            self.insert(stored);
        }
    }

    /// `Cookie` header value for a request to `url`, if any cookie applies.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let https = url.scheme() == "https";
        let now = now_unix();
        let pairs: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|c| c.matches_host(host))
            .filter(|c| c.matches_path(url.path()))
            .filter(|c| https || !c.secure)
            .filter(|c| !c.is_expired(now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for header in cookie_headers {
            if let Ok(raw) = header.to_str() {
                self.store_set_cookie(raw, url);
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.header_for(url)
            .and_then(|value| HeaderValue::from_str(&value).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_set_cookie_then_header() {
        let jar = CookieJar::new();
        let u = url("https://marangatu.set.gov.py/eset/authenticate");
        jar.store_set_cookie("JSESSIONID=abc123; Path=/eset; HttpOnly; Secure", &u);
        jar.store_set_cookie("lang=es; Domain=set.gov.py; Path=/", &u);

        let header = jar
            .header_for(&url("https://marangatu.set.gov.py/eset/perfil/menu"))
            .unwrap();
        assert_eq!(header, "JSESSIONID=abc123; lang=es");

        // Path and scheme rules.
        let outside = jar
            .header_for(&url("https://marangatu.set.gov.py/other"))
            .unwrap();
        assert_eq!(outside, "lang=es");
        let plain = jar
            .header_for(&url("http://marangatu.set.gov.py/eset/x"))
            .unwrap();
        assert_eq!(plain, "lang=es");
    }

    #[test]
    fn test_replacement_and_expiry_removal() {
        let jar = CookieJar::new();
        let u = url("https://example.test/eset/x");
        jar.store_set_cookie("sid=1; Path=/", &u);
        jar.store_set_cookie("sid=2; Path=/", &u);
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.snapshot()[0].value, "2");

        jar.store_set_cookie("sid=gone; Path=/; Max-Age=0", &u);
        assert!(jar.is_empty());
    }

    #[test]
    fn test_foreign_domain_rejected() {
        let jar = CookieJar::new();
        jar.store_set_cookie(
            "evil=1; Domain=attacker.test",
            &url("https://example.test/"),
        );
        assert!(jar.is_empty());
    }

    #[test]
    fn test_default_path() {
        assert_eq!(default_path("/eset/authenticate"), "/eset");
        assert_eq!(default_path("/login"), "/");
        assert_eq!(default_path(""), "/");
    }

    #[tokio::test]
    async fn test_netscape_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("cookies.txt");

        let jar = CookieJar::new();
        jar.insert(StoredCookie {
            domain: "marangatu.set.gov.py".into(),
            include_subdomains: false,
            path: "/eset".into(),
            secure: true,
            http_only: true,
            expires: None,
            name: "JSESSIONID".into(),
            value: "abc123".into(),
        });
        jar.insert(StoredCookie {
            domain: ".set.gov.py".into(),
            include_subdomains: true,
            path: "/".into(),
            secure: false,
            http_only: false,
            expires: Some(4_102_444_800),
            name: "lang".into(),
            value: "es=PY".into(),
        });
        jar.save(&path).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Netscape HTTP Cookie File"));
        assert!(text.contains("#HttpOnly_marangatu.set.gov.py\tFALSE\t/eset\tTRUE\t\tJSESSIONID\tabc123"));

        let loaded = CookieJar::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), jar.snapshot());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::load(&dir.path().join("absent.txt")).unwrap();
        assert!(jar.is_empty());
    }

    #[test]
    fn test_parse_skips_garbage_and_normalizes_zero_expiry() {
        let jar = CookieJar::parse(
            "# comment\n\nnot a cookie line\nexample.test\tFALSE\t/\tFALSE\t0\ta\t1\n",
        );
        let cookies = jar.snapshot();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].expires, None);
    }
}
