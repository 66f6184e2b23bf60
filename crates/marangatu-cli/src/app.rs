//! Wires resolved settings into a [`Runner`] and executes one run.

use crate::config::Settings;
use crate::notifiers::build_notifier;
use anyhow::{bail, Context};
use marangatu::captcha::{CaptchaSolver, CapsolverClient, NopechaClient, SolveOptions, SolverChain};
use marangatu::pipeline::FormSettings;
use marangatu::transport::{ClientOptions, MockupTransport, PortalClient, Transport};
use marangatu::{Credentials, Notifications, RunOutcome, Runner};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub const MISSING_CREDENTIALS: &str =
    "Please set login credentials in .env, .env.local, or as arguments. See file-taxes --help";

/// Captcha providers in priority order: NopeCHA (free tier without a key),
/// then Capsolver when a key is configured.
pub fn solver_chain(settings: &Settings) -> SolverChain {
    let nopecha_key = settings.nopecha_api_key.clone();
    let capsolver_key = settings.capsolver_api_key.clone();
    SolverChain::new()
        .with(
            "nopecha",
            Box::new(move || {
                NopechaClient::new(nopecha_key.clone())
                    .map_err(|e| warn!(error = %e, "nopecha client unavailable"))
                    .ok()
                    .map(|client| Box::new(client) as Box<dyn CaptchaSolver>)
            }),
        )
        .with(
            "capsolver",
            Box::new(move || {
                let key = capsolver_key.clone()?;
                CapsolverClient::new(key)
                    .map_err(|e| warn!(error = %e, "capsolver client unavailable"))
                    .ok()
                    .map(|client| Box::new(client) as Box<dyn CaptchaSolver>)
            }),
        )
}

/// Recorded responses when a mockup directory is set, the network otherwise.
pub fn build_transport(settings: &Settings) -> anyhow::Result<Arc<dyn Transport>> {
    if let Some(dir) = &settings.mockup_dir {
        if !dir.is_dir() {
            bail!("mockup directory {} does not exist", dir.display());
        }
        info!(dir = %dir.display(), "serving portal responses from mockups");
        return Ok(Arc::new(MockupTransport::new(dir.clone())));
    }
    if !settings.verify_tls {
        warn!("TLS certificate verification is disabled for the portal");
    }
    let options = ClientOptions {
        verify_tls: settings.verify_tls,
        cookie_file: Some(settings.cookies_file()),
        user_agents_file: Some(settings.user_agents_file()),
        progress: true,
        ..ClientOptions::default()
    };
    let client = PortalClient::new(options).context("could not build the portal client")?;
    Ok(Arc::new(client))
}

/// Build the runner from settings.
pub fn build_runner(settings: &Settings) -> anyhow::Result<Runner> {
    let notifications = Notifications::new(build_notifier(settings), settings.message_prefix.clone());
    let transport = build_transport(settings)?;
    Ok(Runner::new(transport, notifications)
        .with_solvers(solver_chain(settings))
        .with_solve_options(SolveOptions {
            progress: true,
            ..SolveOptions::default()
        })
        .with_settings(FormSettings {
            activity: settings.activity.clone(),
        }))
}

/// Execute one run and return the process exit status.
pub async fn run(settings: Settings) -> anyhow::Result<i32> {
    let credentials = Credentials::new(settings.username.clone(), settings.password.clone());
    if !credentials.is_complete() {
        bail!(MISSING_CREDENTIALS);
    }

    let runner = build_runner(&settings)?;
    let cancel = runner.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current step");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let outcome = runner.run(&credentials).await;
    match &outcome {
        RunOutcome::NothingPending => info!("nothing pending"),
        RunOutcome::Completed { done } => info!(items = ?done, "all pending items filed"),
        RunOutcome::PartialFailure { done, failed } => {
            warn!(done = ?done, failed = ?failed, "some pending items were not filed")
        }
        RunOutcome::Unauthenticated => warn!("could not log in"),
        RunOutcome::Aborted(reason) => warn!(reason = %reason, "run aborted"),
    }
    Ok(outcome.exit_code())
}
