//! Login and captcha resolution.
//!
//! ```text
//! NotAuthenticated --login--> Authenticated
//!        |                \--> Failed (bad credentials)
//!        v
//! ChallengeDetected --solve + retry--> Authenticated | Failed
//! ```
//!
//! An existing session (logout link present on the portal root) skips the
//! machine entirely. Every `Failed` transition is notified once, here.

use crate::captcha::{Challenge, ChallengeKind, SolveOptions, SolverChain};
use crate::error::{PortalError, PortalResult};
use crate::markup::contains_marker;
use crate::notify::Notifications;
use crate::transport::{Portal, Transport};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Body text of a login rejected for bad credentials.
pub const BAD_CREDENTIALS_MARKER: &str = "Usuario o Contraseña incorrectos";
/// Body text of a login rejected by the security-code check.
pub const CHALLENGE_MARKER: &str = "Código de Seguridad no es correcto";

/// Form field carrying the solved reCAPTCHA token.
pub const CAPTCHA_FIELD: &str = "g-recaptcha-response";

const MSG_BAD_CREDENTIALS: &str = "Incorrect login credentials";
const MSG_UNDETECTABLE: &str =
    "Captcha detected but could not identify type. Please solve it manually.";
const MSG_SOLUTION_REJECTED: &str = "Captcha solution failed. Please solve it manually.";

/// Portal login.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    fn form(&self) -> Vec<(String, String)> {
        vec![
            ("usuario".into(), self.username.clone()),
            ("clave".into(), self.password.clone()),
        ]
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// How the portal answered a login POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginVerdict {
    Accepted,
    BadCredentials,
    ChallengeRequired,
}

/// Classify a login response body by its two known rejection texts.
pub fn classify_login_response(body: &str) -> LoginVerdict {
    if body.contains(BAD_CREDENTIALS_MARKER) {
        LoginVerdict::BadCredentials
    } else if body.contains(CHALLENGE_MARKER) {
        LoginVerdict::ChallengeRequired
    } else {
        LoginVerdict::Accepted
    }
}

#[derive(Debug)]
pub enum AuthState {
    NotAuthenticated,
    ChallengeDetected,
    Authenticated,
    Failed(PortalError),
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed(_))
    }
}

/// State reached from a login verdict. `after_challenge` is set on the
/// retry that carried a solved token.
pub fn after_login(verdict: LoginVerdict, after_challenge: bool) -> AuthState {
    match (verdict, after_challenge) {
        (LoginVerdict::Accepted, _) => AuthState::Authenticated,
        (LoginVerdict::BadCredentials, _) => {
            AuthState::Failed(PortalError::Authentication(MSG_BAD_CREDENTIALS.into()))
        }
        (LoginVerdict::ChallengeRequired, false) => AuthState::ChallengeDetected,
        (LoginVerdict::ChallengeRequired, true) => {
            AuthState::Failed(PortalError::Authentication(MSG_SOLUTION_REJECTED.into()))
        }
    }
}

fn sitekey_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"data-sitekey=["']([^"']+)["']"#).expect("sitekey regex is valid")
    })
}

fn recaptcha_script_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)google\.com/recaptcha.*?k=([^&"']+)"#)
            .expect("recaptcha script regex is valid")
    })
}

/// Find the reCAPTCHA site key on a login page.
///
/// Looks for a `data-sitekey` attribute first, then for a recaptcha script
/// URL with a `k=` parameter. Nothing found yields a [`ChallengeKind::None`]
/// challenge, which is not resolvable.
pub fn detect_challenge(html: &str, origin: &str) -> Challenge {
    let key = sitekey_attr_regex()
        .captures(html)
        .or_else(|| recaptcha_script_regex().captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    match key {
        Some(site_key) => Challenge {
            kind: ChallengeKind::RecaptchaV2,
            site_key,
            origin: origin.to_string(),
        },
        None => Challenge {
            kind: ChallengeKind::None,
            site_key: String::new(),
            origin: origin.to_string(),
        },
    }
}

/// Drives the login state machine over a transport.
pub struct Authenticator<'a> {
    transport: &'a dyn Transport,
    portal: &'a Portal,
    solvers: &'a SolverChain,
    notifications: &'a Notifications,
    solve_options: SolveOptions,
}

impl<'a> Authenticator<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        portal: &'a Portal,
        solvers: &'a SolverChain,
        notifications: &'a Notifications,
    ) -> Self {
        Self {
            transport,
            portal,
            solvers,
            notifications,
            solve_options: SolveOptions::default(),
        }
    }

    pub fn with_solve_options(mut self, options: SolveOptions) -> Self {
        self.solve_options = options;
        self
    }

    /// True when the stored cookies already carry a live session.
    pub async fn check_session(&self) -> PortalResult<bool> {
        info!("checking session");
        let home = self.transport.get(&self.portal.base()).await?;
        Ok(contains_marker(&home, Portal::LOGOUT_MARKER))
    }

    /// Reach `Authenticated` or fail with the notified reason.
    pub async fn establish(&self, credentials: &Credentials) -> PortalResult<()> {
        if self.check_session().await? {
            info!("logged in");
            return Ok(());
        }

        let mut state = AuthState::NotAuthenticated;
        loop {
            state = match state {
                AuthState::NotAuthenticated => {
                    info!("logging in");
                    self.transport.pace().await;
                    let body = self
                        .transport
                        .post_form(&self.portal.authenticate(), credentials.form())
                        .await?;
                    after_login(classify_login_response(&body), false)
                }
                AuthState::ChallengeDetected => self.resolve_challenge(credentials).await?,
                AuthState::Authenticated => return Ok(()),
                AuthState::Failed(err) => {
                    self.notifications.error(&err.to_string()).await;
                    return Err(err);
                }
            };
            debug!(state = ?state, "login state");
        }
    }

    async fn resolve_challenge(&self, credentials: &Credentials) -> PortalResult<AuthState> {
        info!("captcha required, attempting automatic solving");
        let login_page = self.portal.login_page(&credentials.username);
        let html = self.transport.get(&login_page).await?;

        let challenge = detect_challenge(&html, &login_page);
        if !challenge.is_resolvable() {
            return Ok(AuthState::Failed(PortalError::Authentication(
                MSG_UNDETECTABLE.into(),
            )));
        }
        info!(kind = challenge.kind.as_str(), site_key = %challenge.site_key, "challenge detected");

        let token = match self.solvers.solve(&challenge, self.solve_options).await {
            Ok(token) => token,
            Err(e) => {
                self.notifications
                    .error(&format!(
                        "Failed to solve captcha automatically. Please solve it manually at:\n{login_page}"
                    ))
                    .await;
                return Err(PortalError::Solver(e));
            }
        };

        info!("captcha solved, retrying login");
        let mut form = credentials.form();
        form.push((CAPTCHA_FIELD.into(), token));
        self.transport.pace().await;
        let body = self
            .transport
            .post_form(&self.portal.authenticate(), form)
            .await?;
        let next = after_login(classify_login_response(&body), true);
        if matches!(next, AuthState::Authenticated) {
            info!("logged in with captcha");
        }
        Ok(next)
    }
}
