//! Error taxonomy for a filing run.
//!
//! Every variant of [`PortalError`] is fatal to the current pipeline run.
//! The variants are kept apart so operators can tell a network outage from a
//! bad password, a changed portal layout, an explicit rejection, or a captcha
//! provider outage.

use std::time::Duration;

/// Network, TLS, or local I/O failure while talking to the portal.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not build HTTP client: {0}")]
    Setup(String),

    #[error("no mockup file for {url} (tried {tried})")]
    MockupMissing { url: String, tried: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the external captcha solving capability.
#[derive(thiserror::Error, Debug)]
pub enum SolverError {
    /// The provider refused the task or reported an error code.
    #[error("{provider} rejected the task: {reason}")]
    Rejected { provider: String, reason: String },

    /// The provider accepted the task but could not solve it.
    #[error("{provider} could not solve the challenge: {reason}")]
    Failed { provider: String, reason: String },

    /// No answer arrived before the overall deadline.
    #[error("no captcha answer within {0:?}")]
    Timeout(Duration),

    /// Talking to the provider failed; polling treats this as transient.
    #[error("captcha provider unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with something that is not its documented shape.
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("no captcha provider is configured")]
    NoProvider,
}

/// All errors that abort a filing run.
#[derive(thiserror::Error, Debug)]
pub enum PortalError {
    #[error("I/O failure: {0}")]
    Transport(#[from] TransportError),

    /// Bad credentials or an unresolved challenge. The user must act manually.
    #[error("{0}")]
    Authentication(String),

    /// The portal answered with something the pipeline did not expect.
    #[error("{reason} ({step})")]
    Protocol { step: String, reason: String },

    /// The portal explicitly rejected the request; the cause is displayable as-is.
    #[error("{0}")]
    Business(String),

    #[error("captcha solving failed: {0}")]
    Solver(#[from] SolverError),

    #[error("run cancelled before {0}")]
    Cancelled(String),
}

impl PortalError {
    pub(crate) fn protocol(step: impl Into<String>, reason: impl Into<String>) -> Self {
        PortalError::Protocol {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Short category tag used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PortalError::Transport(_) => "transport",
            PortalError::Authentication(_) => "authentication",
            PortalError::Protocol { .. } => "protocol",
            PortalError::Business(_) => "business",
            PortalError::Solver(_) => "solver",
            PortalError::Cancelled(_) => "cancelled",
        }
    }
}

pub type PortalResult<T> = Result<T, PortalError>;
