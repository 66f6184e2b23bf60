//! Notification backends: Pushover over HTTPS, Signal through `signal-cli`,
//! and email over SMTP.

use crate::config::{NotificationService, Settings, SmtpSettings};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use marangatu::notify::{LogNotifier, Notifier};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const PUSHOVER_API: &str = "https://api.pushover.net/1/messages.json";

const SIGNAL_TIMEOUT: Duration = Duration::from_secs(60);
const PUSHOVER_TIMEOUT: Duration = Duration::from_secs(30);
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Implicit-TLS submission port; every other port upgrades with STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Pushover push notifications. HTML markup in messages is rendered.
pub struct PushoverNotifier {
    http: reqwest::Client,
    token: String,
    user: String,
    url: String,
}

impl PushoverNotifier {
    pub fn new(token: impl Into<String>, user: impl Into<String>) -> reqwest::Result<Self> {
        Self::with_url(token, user, PUSHOVER_API)
    }

    pub fn with_url(
        token: impl Into<String>,
        user: impl Into<String>,
        url: impl Into<String>,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(PUSHOVER_TIMEOUT).build()?,
            token: token.into(),
            user: user.into(),
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    fn name(&self) -> &str {
        "pushover"
    }

    async fn send(&self, title: &str, message: &str) -> bool {
        let form = [
            ("token", self.token.as_str()),
            ("user", self.user.as_str()),
            ("title", title),
            ("message", message),
            ("html", "1"),
        ];
        let resp = match self.http.post(&self.url).form(&form).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "pushover request failed");
                return false;
            }
        };
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let accepted = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("status").and_then(|s| s.as_i64()))
            == Some(1);
        if status.is_success() && accepted {
            debug!("pushover accepted the message");
            true
        } else {
            warn!(status = status.as_u16(), body = %body, "pushover rejected the message");
            false
        }
    }
}

/// Signal messages sent by the local `signal-cli` executable.
pub struct SignalNotifier {
    program: PathBuf,
    sender: String,
    recipient: String,
    timeout: Duration,
}

impl SignalNotifier {
    /// Locate `signal-cli` on the PATH. `None` when it is not installed.
    pub fn detect(sender: impl Into<String>, recipient: impl Into<String>) -> Option<Self> {
        match which::which("signal-cli") {
            Ok(program) => Some(Self::with_program(program, sender, recipient)),
            Err(e) => {
                warn!(error = %e, "signal-cli not found");
                None
            }
        }
    }

    pub fn with_program(
        program: impl Into<PathBuf>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            timeout: SIGNAL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Notifier for SignalNotifier {
    fn name(&self) -> &str {
        "signal"
    }

    async fn send(&self, title: &str, message: &str) -> bool {
        let text = format!("{title}\n{message}");
        let run = tokio::process::Command::new(&self.program)
            .arg("-a")
            .arg(&self.sender)
            .arg("send")
            .arg("-m")
            .arg(&text)
            .arg(&self.recipient)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) if output.status.success() => true,
            Ok(Ok(output)) => {
                warn!(
                    status = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "signal-cli failed"
                );
                false
            }
            Ok(Err(e)) => {
                warn!(error = %e, "could not run signal-cli");
                false
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "signal-cli timed out");
                false
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("invalid email address {address:?}: {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },
    #[error("could not set up SMTP relay {host}: {source}")]
    Relay {
        host: String,
        source: lettre::transport::smtp::Error,
    },
}

fn mailbox(address: &str) -> Result<Mailbox, EmailError> {
    address.parse().map_err(|source| EmailError::Address {
        address: address.to_string(),
        source,
    })
}

/// Plain-text email to one or more recipients.
///
/// Generic over the transport so delivery can be swapped for lettre's stub
/// transport.
pub struct EmailNotifier<T = AsyncSmtpTransport<Tokio1Executor>> {
    transport: T,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl EmailNotifier {
    /// SMTP delivery. With a password the session is encrypted and
    /// authenticated (implicit TLS on 465, STARTTLS elsewhere); without one
    /// the message is relayed in the clear.
    pub fn smtp(settings: &SmtpSettings) -> Result<Self, EmailError> {
        let relay_error = |source| EmailError::Relay {
            host: settings.host.clone(),
            source,
        };
        let builder = if settings.password.is_empty() {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        } else {
            let builder = if settings.port == SMTPS_PORT {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            }
            .map_err(relay_error)?;
            builder.credentials(Credentials::new(
                settings.address.clone(),
                settings.password.clone(),
            ))
        };
        let transport = builder
            .port(settings.port)
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Self::with_transport(transport, &settings.address, &settings.recipients)
    }
}

impl<T> EmailNotifier<T> {
    pub fn with_transport(
        transport: T,
        from: &str,
        recipients: &[String],
    ) -> Result<Self, EmailError> {
        Ok(Self {
            transport,
            from: mailbox(from)?,
            recipients: recipients
                .iter()
                .map(|r| mailbox(r))
                .collect::<Result<_, _>>()?,
        })
    }

    fn compose(&self, title: &str, message: &str) -> Result<Message, lettre::error::Error> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(title)
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        builder.body(message.to_string())
    }
}

#[async_trait]
impl<T> Notifier for EmailNotifier<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: std::fmt::Display,
{
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, title: &str, message: &str) -> bool {
        let email = match self.compose(title, message) {
            Ok(email) => email,
            Err(e) => {
                warn!(error = %e, "could not compose email");
                return false;
            }
        };
        match self.transport.send(email).await {
            Ok(_) => {
                info!(from = %self.from, recipients = self.recipients.len(), "email sent");
                true
            }
            Err(e) => {
                warn!(error = %e, "email delivery failed");
                false
            }
        }
    }
}

/// Backend for the configured service. Falls back to logging only when the
/// service is unset or incompletely configured.
pub fn build_notifier(settings: &Settings) -> Arc<dyn Notifier> {
    match settings.notification_service {
        Some(NotificationService::Pushover) => {
            if settings.pushover_token.is_empty() || settings.pushover_user.is_empty() {
                warn!("pushover selected without PUSHOVER_TOKEN and PUSHOVER_USER, logging only");
                return Arc::new(LogNotifier);
            }
            match PushoverNotifier::new(settings.pushover_token.clone(), settings.pushover_user.clone()) {
                Ok(pushover) => Arc::new(pushover),
                Err(e) => {
                    warn!(error = %e, "could not set up pushover, logging only");
                    Arc::new(LogNotifier)
                }
            }
        }
        Some(NotificationService::Signal) => {
            if settings.signal_user.is_empty() || settings.signal_recipient.is_empty() {
                warn!("signal selected without SIGNAL_USER and SIGNAL_RECIPIENT, logging only");
                return Arc::new(LogNotifier);
            }
            match SignalNotifier::detect(settings.signal_user.clone(), settings.signal_recipient.clone()) {
                Some(signal) => Arc::new(signal),
                None => Arc::new(LogNotifier),
            }
        }
        Some(NotificationService::Email) => {
            if !settings.smtp.is_complete() {
                warn!("email selected without SMTP_HOST, SMTP_ADDR and SMTP_RECV, logging only");
                return Arc::new(LogNotifier);
            }
            match EmailNotifier::smtp(&settings.smtp) {
                Ok(email) => Arc::new(email),
                Err(e) => {
                    warn!(error = %e, "could not set up email, logging only");
                    Arc::new(LogNotifier)
                }
            }
        }
        None => Arc::new(LogNotifier),
    }
}
