//! Configuration loading and resolution.
//!
//! Values come from, highest priority first: command-line flags (or their
//! `MARANGATU_*` environment variables), `.env.local`, `.env`, defaults. The
//! two files live in the working directory and use shell syntax
//! (`export KEY="value"`).

use clap::{Parser, ValueEnum};
use marangatu::pipeline::forms::EconomicActivity;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default prefix of every notification: the Paraguayan flag and a tag.
pub const DEFAULT_MESSAGE_PREFIX: &str = "\u{1F1F5}\u{1F1FE} taxes\n";

pub const COOKIES_FILE: &str = "cookies.txt";
pub const USER_AGENTS_FILE: &str = "user-agents.txt";
pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NotificationService {
    Pushover,
    Signal,
    Email,
}

impl NotificationService {
    fn from_key(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pushover" => Some(Self::Pushover),
            "signal" => Some(Self::Signal),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

#[derive(Parser, Debug, Default)]
#[command(
    name = "file-taxes",
    about = "Automatically file taxes in Paraguay",
    version,
    after_help = "Examples:\n  file-taxes -u USERNAME -p PASSWORD\n  file-taxes -n signal --signal-user +10123456789 --signal-recipient +19876543210\n  file-taxes -n email --smtp-server smtp.example.com:587 --smtp-user me@example.com --smtp-recipient \"a@example.com;b@example.com\"\n  file-taxes --verbose"
)]
pub struct Cli {
    /// Marangatu login username.
    #[arg(short, long, env = "MARANGATU_USERNAME")]
    pub username: Option<String>,

    /// Marangatu login password.
    #[arg(short, long, env = "MARANGATU_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// NopeCHA API key (optional, the free tier works without one).
    #[arg(long, env = "MARANGATU_NOPECHA_API_KEY", hide_env_values = true)]
    pub nopecha_api_key: Option<String>,

    /// Capsolver API key (paid alternative).
    #[arg(long, env = "MARANGATU_CAPSOLVER_API_KEY", hide_env_values = true)]
    pub capsolver_api_key: Option<String>,

    /// Notification service. Without one, messages are only logged.
    #[arg(short = 'n', long, value_enum)]
    pub notification_service: Option<NotificationService>,

    /// Prefix for notification messages.
    #[arg(long)]
    pub message_prefix: Option<String>,

    /// Pushover application API token.
    #[arg(long, hide_env_values = true, env = "MARANGATU_PUSHOVER_TOKEN")]
    pub pushover_token: Option<String>,

    /// Pushover user or group key.
    #[arg(long)]
    pub pushover_user: Option<String>,

    /// Signal sender phone number.
    #[arg(long)]
    pub signal_user: Option<String>,

    /// Signal recipient phone number.
    #[arg(long)]
    pub signal_recipient: Option<String>,

    /// SMTP server as HOST or HOST:PORT.
    #[arg(long, value_name = "HOST:PORT")]
    pub smtp_server: Option<String>,

    /// SMTP login, also used as the sender address.
    #[arg(long)]
    pub smtp_user: Option<String>,

    /// SMTP password. Without one the message is relayed unauthenticated.
    #[arg(long, env = "MARANGATU_SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<String>,

    /// Email recipients, separated by semicolons.
    #[arg(long)]
    pub smtp_recipient: Option<String>,

    /// Verify the portal's TLS certificate (off by default; its chain is broken).
    #[arg(long)]
    pub verify_tls: bool,

    /// Serve portal responses from this directory instead of the network.
    #[arg(long)]
    pub mockup_dir: Option<PathBuf>,

    /// Directory holding .env, cookies.txt and user-agents.txt.
    #[arg(short = 'w', long)]
    pub working_dir: Option<PathBuf>,

    /// Economic activity code for the income-share update (e.g. C4_96099).
    #[arg(long)]
    pub activity_code: Option<String>,

    /// Economic activity display name.
    #[arg(long)]
    pub activity_name: Option<String>,

    /// Share of income of the economic activity, in percent.
    #[arg(long)]
    pub activity_share: Option<u32>,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug output.
    #[arg(short, long)]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error). Overrides -v and -d.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Print a shell completion script and exit.
    #[arg(long, value_name = "SHELL")]
    pub completions: Option<clap_complete::Shell>,
}

/// Parse a shell-style env file.
///
/// Accepts `KEY=value`, optional `export`, single or double quotes, trailing
/// `# comments` on unquoted values, and a `$'\n'` suffix after a double-quoted
/// value (appends a newline). Other lines are ignored.
pub fn parse_env(text: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
        let Some((key, rest)) = line.split_once('=') else {
            continue;
        };
        if !is_env_key(key) {
            continue;
        }
        vars.insert(key.to_string(), env_value(rest));
    }
    vars
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn env_value(rest: &str) -> String {
    if let Some(quoted) = rest.strip_prefix('"') {
        return match quoted.find('"') {
            Some(end) => {
                let mut value = quoted[..end].to_string();
                if quoted[end + 1..].trim_start().starts_with("$'\\n'") {
                    value.push('\n');
                }
                value
            }
            None => quoted.to_string(),
        };
    }
    if let Some(quoted) = rest.strip_prefix('\'') {
        return match quoted.find('\'') {
            Some(end) => quoted[..end].to_string(),
            None => quoted.to_string(),
        };
    }
    rest.split('#').next().unwrap_or_default().trim().to_string()
}

/// `.env` overlaid with `.env.local`. Missing files contribute nothing.
pub fn load_env_files(dir: &Path) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for name in [".env", ".env.local"] {
        let path = dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(text) => vars.extend(parse_env(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not read env file"),
        }
    }
    vars
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub username: String,
    pub password: String,
    pub nopecha_api_key: Option<String>,
    pub capsolver_api_key: Option<String>,
    pub notification_service: Option<NotificationService>,
    pub message_prefix: String,
    pub pushover_token: String,
    pub pushover_user: String,
    pub signal_user: String,
    pub signal_recipient: String,
    pub smtp: SmtpSettings,
    pub verify_tls: bool,
    pub mockup_dir: Option<PathBuf>,
    pub working_dir: PathBuf,
    pub activity: EconomicActivity,
    pub log_filter: String,
}

/// Outgoing mail server for the email notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Login and `From` address.
    pub address: String,
    pub password: String,
    pub recipients: Vec<String>,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SMTP_PORT,
            address: String::new(),
            password: String::new(),
            recipients: Vec::new(),
        }
    }
}

impl SmtpSettings {
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty() && !self.address.is_empty() && !self.recipients.is_empty()
    }
}

/// `a@x; b@y` into its non-empty parts.
fn split_recipients(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

fn truthy_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Settings {
    /// Merge flags over env-file values over defaults.
    pub fn resolve(cli: &Cli, env: &HashMap<String, String>, working_dir: PathBuf) -> Self {
        let pick = |flag: &Option<String>, key: &str| -> Option<String> {
            flag.clone()
                .filter(|v| !v.is_empty())
                .or_else(|| env.get(key).cloned())
        };
        let text = |flag: &Option<String>, key: &str| pick(flag, key).unwrap_or_default();
        let optional = |flag: &Option<String>, key: &str| pick(flag, key).filter(|v| !v.is_empty());

        let defaults = EconomicActivity::default();
        let activity = EconomicActivity {
            code: pick(&cli.activity_code, "ACTIVITY_CODE").unwrap_or(defaults.code),
            name: pick(&cli.activity_name, "ACTIVITY_NAME").unwrap_or(defaults.name),
            share: cli
                .activity_share
                .or_else(|| env.get("ACTIVITY_SHARE").and_then(|v| v.trim().parse().ok()))
                .unwrap_or(defaults.share),
        };

        let env_port: Option<u16> = env.get("SMTP_PORT").and_then(|v| v.trim().parse().ok());
        let (host, port) = match cli.smtp_server.as_deref().filter(|v| !v.is_empty()) {
            Some(server) => match server.split_once(':') {
                Some((host, port)) => (host.to_string(), port.trim().parse().ok().or(env_port)),
                None => (server.to_string(), env_port),
            },
            None => (env.get("SMTP_HOST").cloned().unwrap_or_default(), env_port),
        };
        let smtp = SmtpSettings {
            host,
            port: port.unwrap_or(DEFAULT_SMTP_PORT),
            address: text(&cli.smtp_user, "SMTP_ADDR"),
            password: text(&cli.smtp_password, "SMTP_PWD"),
            recipients: split_recipients(&text(&cli.smtp_recipient, "SMTP_RECV")),
        };

        let log_filter = if let Some(level) = cli.log_level.clone().or_else(|| env.get("LOG_LEVEL").cloned()) {
            level
        } else if cli.debug {
            "debug".to_string()
        } else if cli.verbose {
            "info".to_string()
        } else {
            "warn,marangatu=info,marangatu_cli=info".to_string()
        };

        Self {
            username: text(&cli.username, "USERNAME"),
            password: text(&cli.password, "PASSWORD"),
            nopecha_api_key: optional(&cli.nopecha_api_key, "NOPECHA_API_KEY"),
            capsolver_api_key: optional(&cli.capsolver_api_key, "CAPSOLVER_API_KEY"),
            notification_service: cli.notification_service.or_else(|| {
                env.get("NOTIFICATION_SERVICE")
                    .and_then(|v| NotificationService::from_key(v))
            }),
            message_prefix: cli
                .message_prefix
                .clone()
                .or_else(|| env.get("MESSAGE_PREFIX").cloned())
                .unwrap_or_else(|| DEFAULT_MESSAGE_PREFIX.to_string()),
            pushover_token: text(&cli.pushover_token, "PUSHOVER_TOKEN"),
            pushover_user: text(&cli.pushover_user, "PUSHOVER_USER"),
            signal_user: text(&cli.signal_user, "SIGNAL_USER"),
            signal_recipient: text(&cli.signal_recipient, "SIGNAL_RECIPIENT"),
            smtp,
            verify_tls: cli.verify_tls || env.get("VERIFY_TLS").is_some_and(|v| truthy_flag(v)),
            mockup_dir: cli
                .mockup_dir
                .clone()
                .or_else(|| env.get("MOCKUP_DIR").filter(|v| !v.is_empty()).map(PathBuf::from))
                .map(|dir| if dir.is_relative() { working_dir.join(dir) } else { dir }),
            activity,
            log_filter,
            working_dir,
        }
    }

    pub fn cookies_file(&self) -> PathBuf {
        self.working_dir.join(COOKIES_FILE)
    }

    pub fn user_agents_file(&self) -> PathBuf {
        self.working_dir.join(USER_AGENTS_FILE)
    }
}

/// Working directory: the flag, else the current directory.
pub fn resolve_working_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
