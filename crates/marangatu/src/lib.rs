//! Marangatu: session-and-form pipeline for the Paraguayan tax portal.
//!
//! Establishes an authenticated session (solving the login captcha through an
//! external provider when asked), derives the portal's encrypted `t3` tokens,
//! and drives per-form step lists that harvest server-rendered fields and
//! submit them.

pub mod auth;
pub mod captcha;
pub mod codec;
pub mod error;
pub mod markup;
pub mod notify;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testkit;

pub use auth::{Authenticator, Credentials};
pub use captcha::{CaptchaSolver, CapsolverClient, NopechaClient, SolveOptions, SolverChain};
pub use error::{PortalError, PortalResult, SolverError, TransportError};
pub use notify::{LogNotifier, Notifications, Notifier};
pub use pipeline::{FormSettings, Pipeline};
pub use runner::{RunOutcome, Runner};
pub use transport::{ClientOptions, MockupTransport, Portal, PortalClient, Transport};
pub use types::*;
