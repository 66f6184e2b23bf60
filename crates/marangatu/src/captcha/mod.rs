//! Delegated captcha solving.
//!
//! Providers implement [`CaptchaSolver`] (create a task, poll it). [`solve`]
//! drives the single polling loop of the system: fixed interval, bounded by
//! an overall deadline whose expiry counts as a solver failure.
//! [`SolverChain`] tries a ranked list of provider factories in order.

pub mod capsolver;
pub mod nopecha;

use crate::error::SolverError;
use crate::progress::WaitSpinner;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use capsolver::CapsolverClient;
pub use nopecha::NopechaClient;

/// Kind of interactive verification the portal inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    RecaptchaV2,
    None,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::RecaptchaV2 => "recaptcha_v2",
            ChallengeKind::None => "none",
        }
    }
}

/// A detected challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: ChallengeKind,
    pub site_key: String,
    /// Page the challenge was served on; providers need it as the website URL.
    pub origin: String,
}

impl Challenge {
    /// A reCAPTCHA challenge is only solvable with a site key.
    pub fn is_resolvable(&self) -> bool {
        self.kind == ChallengeKind::RecaptchaV2 && !self.site_key.is_empty()
    }
}

/// Result of polling a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Solved(String),
    Failed(String),
}

/// An external captcha solving provider.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Submit a reCAPTCHA v2 task. Fails if the provider rejects it.
    async fn create_task(&self, site_url: &str, site_key: &str) -> Result<String, SolverError>;

    /// Check on a task.
    async fn poll(&self, task_id: &str) -> Result<TaskStatus, SolverError>;
}

/// Polling cadence and overall deadline.
#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Show a terminal spinner while waiting on the provider.
    pub progress: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
            progress: false,
        }
    }
}

/// Create a task and poll it until solved, failed, or timed out.
///
/// Network errors while polling are transient and the loop keeps going;
/// provider error codes end it.
pub async fn solve(
    solver: &dyn CaptchaSolver,
    challenge: &Challenge,
    opts: SolveOptions,
) -> Result<String, SolverError> {
    if !challenge.is_resolvable() {
        return Err(SolverError::InvalidResponse(format!(
            "unresolvable {} challenge",
            challenge.kind.as_str()
        )));
    }

    let provider = solver.name().to_string();
    info!(provider = %provider, origin = %challenge.origin, "solving {}", challenge.kind.as_str());
    let _spinner = WaitSpinner::start(opts.progress, format!("Solving captcha with {provider}"));

    let polling = async {
        let task_id = match solver
            .create_task(&challenge.origin, &challenge.site_key)
            .await
        {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        debug!(provider = %provider, task_id = %task_id, "captcha task created");

        let started = tokio::time::Instant::now();
        loop {
            tokio::time::sleep(opts.poll_interval).await;
            match solver.poll(&task_id).await {
                Ok(TaskStatus::Solved(token)) => {
                    info!(provider = %provider, "captcha solved");
                    return Ok(token);
                }
                Ok(TaskStatus::Failed(reason)) => {
                    return Err(SolverError::Failed {
                        provider: provider.clone(),
                        reason,
                    });
                }
                Ok(TaskStatus::Pending) => {
                    debug!(elapsed = ?started.elapsed(), "captcha solving in progress");
                }
                Err(SolverError::Http(e)) => {
                    warn!(provider = %provider, error = %e, "polling failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    };

    match tokio::time::timeout(opts.timeout, polling).await {
        Ok(result) => result,
        Err(_) => Err(SolverError::Timeout(opts.timeout)),
    }
}

/// Builds a provider, or `None` when it is not configured.
pub type SolverFactory = Box<dyn Fn() -> Option<Box<dyn CaptchaSolver>> + Send + Sync>;

/// Ranked provider factories, tried in order until one yields a token.
#[derive(Default)]
pub struct SolverChain {
    factories: Vec<(String, SolverFactory)>,
}

impl SolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider with lower priority than those already added.
    pub fn with(mut self, label: impl Into<String>, factory: SolverFactory) -> Self {
        self.factories.push((label.into(), factory));
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Solve with the first provider that succeeds; the last error otherwise.
    pub async fn solve(
        &self,
        challenge: &Challenge,
        opts: SolveOptions,
    ) -> Result<String, SolverError> {
        let mut last_err = SolverError::NoProvider;
        for (label, factory) in &self.factories {
            let Some(solver) = factory() else {
                debug!(provider = %label, "provider not configured, skipping");
                continue;
            };
            match solve(solver.as_ref(), challenge, opts).await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    warn!(provider = %label, error = %e, "provider failed, trying next");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        name: &'static str,
        statuses: Vec<TaskStatus>,
        polls: Arc<AtomicUsize>,
        reject: bool,
    }

    #[async_trait]
    impl CaptchaSolver for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn create_task(&self, _url: &str, _key: &str) -> Result<String, SolverError> {
            if self.reject {
                return Err(SolverError::Rejected {
                    provider: self.name.into(),
                    reason: "ERROR_KEY_DENIED_ACCESS".into(),
                });
            }
            Ok("task-1".into())
        }

        async fn poll(&self, _task_id: &str) -> Result<TaskStatus, SolverError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .statuses
                .get(n)
                .cloned()
                .unwrap_or(TaskStatus::Pending))
        }
    }

    fn challenge() -> Challenge {
        Challenge {
            kind: ChallengeKind::RecaptchaV2,
            site_key: "site-key".into(),
            origin: "https://example.test/eset/login".into(),
        }
    }

    fn fast() -> SolveOptions {
        SolveOptions {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(500),
            ..SolveOptions::default()
        }
    }

    #[tokio::test]
    async fn test_solve_after_pending() {
        let polls = Arc::new(AtomicUsize::new(0));
        let solver = Scripted {
            name: "scripted",
            statuses: vec![
                TaskStatus::Pending,
                TaskStatus::Pending,
                TaskStatus::Solved("tok".into()),
            ],
            polls: polls.clone(),
            reject: false,
        };
        let opts = SolveOptions {
            progress: true,
            ..fast()
        };
        let token = solve(&solver, &challenge(), opts).await.unwrap();
        assert_eq!(token, "tok");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_is_solver_error() {
        let solver = Scripted {
            name: "slow",
            statuses: vec![],
            polls: Arc::new(AtomicUsize::new(0)),
            reject: false,
        };
        let opts = SolveOptions {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(40),
            ..SolveOptions::default()
        };
        let err = solve(&solver, &challenge(), opts).await.unwrap_err();
        assert!(matches!(err, SolverError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unresolvable_challenge() {
        let solver = Scripted {
            name: "unused",
            statuses: vec![],
            polls: Arc::new(AtomicUsize::new(0)),
            reject: false,
        };
        let mut c = challenge();
        c.site_key.clear();
        assert!(solve(&solver, &c, fast()).await.is_err());
    }

    #[tokio::test]
    async fn test_chain_falls_back_in_order() {
        let chain = SolverChain::new()
            .with("absent", Box::new(|| None))
            .with(
                "rejecting",
                Box::new(|| {
                    Some(Box::new(Scripted {
                        name: "rejecting",
                        statuses: vec![],
                        polls: Arc::new(AtomicUsize::new(0)),
                        reject: true,
                    }) as Box<dyn CaptchaSolver>)
                }),
            )
            .with(
                "working",
                Box::new(|| {
                    Some(Box::new(Scripted {
                        name: "working",
                        statuses: vec![TaskStatus::Solved("from-working".into())],
                        polls: Arc::new(AtomicUsize::new(0)),
                        reject: false,
                    }) as Box<dyn CaptchaSolver>)
                }),
            );
        assert_eq!(chain.len(), 3);
        let token = chain.solve(&challenge(), fast()).await.unwrap();
        assert_eq!(token, "from-working");
    }

    #[tokio::test]
    async fn test_empty_chain_has_no_provider() {
        let err = SolverChain::new()
            .solve(&challenge(), fast())
            .await
            .unwrap_err();
        assert!(matches!(err, SolverError::NoProvider));
    }
}
