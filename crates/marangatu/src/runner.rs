//! One filing run: log in, read the profile, apply required profile updates,
//! file every pending form that is due.

use crate::auth::{Authenticator, Credentials};
use crate::captcha::{SolveOptions, SolverChain};
use crate::codec::{self, ParamMap};
use crate::error::{PortalError, PortalResult};
use crate::notify::Notifications;
use crate::pipeline::{forms, FormDefinition, FormSettings, Pipeline};
use crate::transport::{Portal, Transport};
use crate::types::{current_period, FormContext, MenuEntry, PendingForm, Profile, ProfileControls, Subject};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PROFILE_PATH: &str = "perfil/publico";
const PROFILE_CONTROLS_PATH: &str = "perfil/informacionControlesPerfil";
const PENDING_PATH: &str = "perfil/vencimientos";
const MENU_PATH: &str = "perfil/menu";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Logged in; nothing was due.
    NothingPending,
    /// Every attempted item succeeded.
    Completed { done: Vec<String> },
    /// At least one attempted item failed.
    PartialFailure {
        done: Vec<String>,
        failed: Vec<String>,
    },
    /// No authenticated session could be established.
    Unauthenticated,
    /// The run stopped before processing any item.
    Aborted(String),
}

impl RunOutcome {
    /// Process exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::NothingPending | RunOutcome::Completed { .. } => 0,
            RunOutcome::PartialFailure { .. } => 2,
            RunOutcome::Unauthenticated | RunOutcome::Aborted(_) => 1,
        }
    }
}

#[derive(Default)]
struct Tally {
    done: Vec<String>,
    failed: Vec<String>,
}

impl Tally {
    fn outcome(self) -> RunOutcome {
        match (self.done.is_empty(), self.failed.is_empty()) {
            (true, true) => RunOutcome::NothingPending,
            (_, true) => RunOutcome::Completed { done: self.done },
            _ => RunOutcome::PartialFailure {
                done: self.done,
                failed: self.failed,
            },
        }
    }
}

pub struct Runner {
    transport: Arc<dyn Transport>,
    portal: Portal,
    solvers: SolverChain,
    notifications: Notifications,
    settings: FormSettings,
    solve_options: SolveOptions,
    cancel: Arc<AtomicBool>,
    today: Option<NaiveDate>,
}

impl Runner {
    pub fn new(transport: Arc<dyn Transport>, notifications: Notifications) -> Self {
        Self {
            transport,
            portal: Portal::default(),
            solvers: SolverChain::new(),
            notifications,
            settings: FormSettings::default(),
            solve_options: SolveOptions::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            today: None,
        }
    }

    pub fn with_portal(mut self, portal: Portal) -> Self {
        self.portal = portal;
        self
    }

    pub fn with_solvers(mut self, solvers: SolverChain) -> Self {
        self.solvers = solvers;
        self
    }

    pub fn with_settings(mut self, settings: FormSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_solve_options(mut self, options: SolveOptions) -> Self {
        self.solve_options = options;
        self
    }

    /// Fix the calendar date used for the due period and request dates.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Flag that stops the run between steps.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn today(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(self.transport.as_ref(), &self.portal, &self.settings)
            .with_cancel(Arc::clone(&self.cancel))
            .with_today(self.today())
    }

    /// Execute a whole run. Every failure is notified exactly once.
    pub async fn run(&self, credentials: &Credentials) -> RunOutcome {
        let auth = Authenticator::new(
            self.transport.as_ref(),
            &self.portal,
            &self.solvers,
            &self.notifications,
        )
        .with_solve_options(self.solve_options);

        if let Err(e) = auth.establish(credentials).await {
            // Login rejections and solver failures were notified by the resolver.
            if !matches!(e, PortalError::Authentication(_) | PortalError::Solver(_)) {
                self.notifications.error(&e.to_string()).await;
            }
            warn!(kind = e.kind(), error = %e, "not authenticated");
            return RunOutcome::Unauthenticated;
        }

        let profile = match self.profile().await {
            Ok(profile) => profile,
            Err(e) => {
                self.notifications.error(&e.to_string()).await;
                return RunOutcome::Aborted(e.to_string());
            }
        };
        info!("Welcome {}!", profile.first_name());

        let mut tally = Tally::default();
        if let Err(e) = self.profile_updates(&profile, &mut tally).await {
            return self.abort(e).await;
        }
        if let Err(e) = self.pending_forms(&profile, &mut tally).await {
            if matches!(e, PortalError::Cancelled(_)) {
                return self.abort(e).await;
            }
            self.notifications.error(&e.to_string()).await;
            tally.failed.push(e.to_string());
        }

        let outcome = tally.outcome();
        info!(exit_code = outcome.exit_code(), "run finished");
        outcome
    }

    /// End the run early. Cancellation is logged only; anything else is notified.
    async fn abort(&self, e: PortalError) -> RunOutcome {
        if matches!(e, PortalError::Cancelled(_)) {
            warn!(error = %e, "run cancelled");
        } else {
            self.notifications.error(&e.to_string()).await;
        }
        RunOutcome::Aborted(e.to_string())
    }

    fn check_cancelled(&self, before: &str) -> PortalResult<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(PortalError::Cancelled(before.to_string()));
        }
        Ok(())
    }

    fn empty_token() -> String {
        codec::encode(&ParamMap::new())
    }

    async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> PortalResult<Option<T>> {
        self.transport.pace().await;
        let body = self
            .transport
            .get(&self.portal.tokenized(path, &Self::empty_token()))
            .await?;
        match serde_json::from_str(&body) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                debug!(path, error = %e, "undecodable reply");
                Ok(None)
            }
        }
    }

    async fn profile(&self) -> PortalResult<Profile> {
        info!("Fetching profile information");
        let profile: Profile = self
            .fetch_json(PROFILE_PATH)
            .await?
            .ok_or_else(|| PortalError::protocol("fetching profile", "Could not parse profile data"))?;
        if profile.name.trim().is_empty() {
            return Err(PortalError::protocol("fetching profile", "Could not get user data"));
        }
        Ok(profile)
    }

    async fn profile_updates(&self, profile: &Profile, tally: &mut Tally) -> PortalResult<()> {
        info!("Checking profile info changes");
        let controls: ProfileControls = self
            .fetch_json(PROFILE_CONTROLS_PATH)
            .await?
            .unwrap_or_default();
        if !controls.must_update {
            info!("No pending profile actions");
            return Ok(());
        }

        for link in &controls.links {
            self.check_cancelled(&format!("profile data {}", link.text))?;
            info!("Profile data {} must be updated", link.text);
            let ctx = FormContext {
                profile: profile.clone(),
                menu: Vec::new(),
                subject: Subject::Link(link.url.clone()),
            };
            match forms::profile_update(&link.handler_key()) {
                Some(form) => self.execute(form, &ctx, tally).await,
                None => {
                    self.notifications
                        .error(&format!(
                            "Profile data {} requested but not yet implemented. Please update it manually.",
                            link.text
                        ))
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn pending_forms(&self, profile: &Profile, tally: &mut Tally) -> PortalResult<()> {
        info!("Checking pending forms");
        let pending: Vec<PendingForm> = self.fetch_json(PENDING_PATH).await?.unwrap_or_default();
        if pending.is_empty() {
            info!("No pending actions");
            return Ok(());
        }

        self.check_cancelled("fetching menu items")?;
        info!("Fetching menu items");
        let menu: Vec<MenuEntry> = self.fetch_json(MENU_PATH).await?.unwrap_or_default();
        let due = current_period(self.today());

        for item in &pending {
            self.check_cancelled(&format!("tax form no. {}", item.form))?;
            info!("Tax form no. {} needs to be filed", item.form);
            match forms::tax_form(&item.form) {
                Some(form) if item.period == due => {
                    let ctx = FormContext {
                        profile: profile.clone(),
                        menu: menu.clone(),
                        subject: Subject::Period(item.period.clone()),
                    };
                    self.execute(form, &ctx, tally).await;
                }
                Some(_) => {
                    info!(
                        period = %item.period,
                        due = %due,
                        "Please wait for the next fiscal period (e.g. next month) to begin."
                    );
                }
                None => {
                    self.notifications
                        .error(&format!(
                            "Tax form no. {} requested but not yet implemented. Please file it manually.",
                            item.form
                        ))
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, form: &FormDefinition, ctx: &FormContext, tally: &mut Tally) {
        match self.pipeline().run(form, ctx).await {
            Ok(message) => {
                self.notifications.success(&message).await;
                tally.done.push(form.id.to_string());
            }
            Err(e) => {
                warn!(form = form.id, kind = e.kind(), "pipeline failed");
                self.notifications.error(&e.to_string()).await;
                tally.failed.push(form.id.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{RecordingNotifier, ScriptedTransport};

    const HOME: &str = r#"<a href="/eset/logout">Salir</a>"#;
    const PROFILE: &str = r#"{"rucActivo":"80000000","dvActivo":"5","nombre":"PEREZ JUAN"}"#;

    fn runner(transport: ScriptedTransport, recorder: Arc<RecordingNotifier>) -> (Runner, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let runner = Runner::new(transport.clone(), Notifications::new(recorder, ""))
            .with_today(NaiveDate::from_ymd_opt(2024, 10, 5).unwrap());
        (runner, transport)
    }

    fn creds() -> Credentials {
        Credentials::new("80000000", "secret")
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::NothingPending.exit_code(), 0);
        assert_eq!(RunOutcome::Completed { done: vec![] }.exit_code(), 0);
        assert_eq!(
            RunOutcome::PartialFailure {
                done: vec![],
                failed: vec!["1".into()]
            }
            .exit_code(),
            2
        );
        assert_eq!(RunOutcome::Unauthenticated.exit_code(), 1);
        assert_eq!(RunOutcome::Aborted("x".into()).exit_code(), 1);
    }

    #[tokio::test]
    async fn test_nothing_pending() {
        let recorder = Arc::new(RecordingNotifier::default());
        let (runner, _) = runner(
            ScriptedTransport::new()
                .reply("/eset", HOME)
                .reply("perfil/publico", PROFILE)
                .reply("perfil/informacionControlesPerfil", r#"{"debeActualizar":false}"#)
                .reply("perfil/vencimientos", "[]"),
            recorder.clone(),
        );
        assert_eq!(runner.run(&creds()).await, RunOutcome::NothingPending);
        assert!(recorder.messages().is_empty());
    }

    #[tokio::test]
    async fn test_empty_profile_name_aborts() {
        let recorder = Arc::new(RecordingNotifier::default());
        let (runner, _) = runner(
            ScriptedTransport::new()
                .reply("/eset", HOME)
                .reply("perfil/publico", r#"{"rucActivo":"1","nombre":""}"#),
            recorder.clone(),
        );
        let outcome = runner.run(&creds()).await;
        assert!(matches!(outcome, RunOutcome::Aborted(_)));
        let messages = recorder.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("Could not get user data"));
    }

    #[tokio::test]
    async fn test_unreachable_portal_is_unauthenticated() {
        let recorder = Arc::new(RecordingNotifier::default());
        let (runner, _) = runner(ScriptedTransport::new(), recorder.clone());
        assert_eq!(runner.run(&creds()).await, RunOutcome::Unauthenticated);
        assert_eq!(recorder.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_period_form_is_skipped_and_unknown_link_reported() {
        let recorder = Arc::new(RecordingNotifier::default());
        let (runner, transport) = runner(
            ScriptedTransport::new()
                .reply("/eset", HOME)
                .reply("perfil/publico", PROFILE)
                .reply(
                    "perfil/informacionControlesPerfil",
                    r#"{"debeActualizar":true,"vinculos":[{"texto":"Datos de Contacto","url":"/eset/x"}]}"#,
                )
                .reply("perfil/vencimientos", r#"[{"impuesto":"211","periodo":"202408"}]"#)
                .reply("perfil/menu", "[]"),
            recorder.clone(),
        );
        // Unsupported items are reported but do not fail the run.
        assert_eq!(runner.run(&creds()).await, RunOutcome::NothingPending);
        let messages = recorder.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].1,
            "Profile data Datos de Contacto requested but not yet implemented. Please update it manually."
        );
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn test_unknown_form_keeps_run_successful() {
        let recorder = Arc::new(RecordingNotifier::default());
        let (runner, _) = runner(
            ScriptedTransport::new()
                .reply("/eset", HOME)
                .reply("perfil/publico", PROFILE)
                .reply("perfil/informacionControlesPerfil", r#"{"debeActualizar":false}"#)
                .reply("perfil/vencimientos", r#"[{"impuesto":"515","periodo":"202409"}]"#)
                .reply("perfil/menu", "[]"),
            recorder.clone(),
        );
        let outcome = runner.run(&creds()).await;
        assert_eq!(outcome.exit_code(), 0);
        let messages = recorder.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].1,
            "Tax form no. 515 requested but not yet implemented. Please file it manually."
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_before_pending_forms() {
        let recorder = Arc::new(RecordingNotifier::default());
        let (runner, transport) = runner(
            ScriptedTransport::new()
                .reply("/eset", HOME)
                .reply("perfil/publico", PROFILE)
                .reply("perfil/informacionControlesPerfil", r#"{"debeActualizar":false}"#)
                .reply(
                    "perfil/vencimientos",
                    r#"[{"impuesto":"955","periodo":"202409"},{"impuesto":"515","periodo":"202409"}]"#,
                )
                .reply("perfil/menu", "[]"),
            recorder.clone(),
        );
        runner.cancel_flag().store(true, Ordering::SeqCst);

        let outcome = runner.run(&creds()).await;
        assert!(matches!(outcome, RunOutcome::Aborted(ref reason) if reason.contains("cancelled")));
        assert_eq!(outcome.exit_code(), 1);
        assert!(recorder.messages().is_empty());
        // The menu is never fetched and no form step runs.
        assert_eq!(transport.remaining(), 1);
        assert!(transport.requests().iter().all(|r| !r.url.contains("perfil/menu")));
    }

    #[tokio::test]
    async fn test_cancelled_between_profile_links() {
        let recorder = Arc::new(RecordingNotifier::default());
        let (runner, transport) = runner(
            ScriptedTransport::new()
                .reply("/eset", HOME)
                .reply("perfil/publico", PROFILE)
                .reply(
                    "perfil/informacionControlesPerfil",
                    r#"{"debeActualizar":true,"vinculos":[{"texto":"Datos A","url":"/a"},{"texto":"Datos B","url":"/b"}]}"#,
                ),
            recorder.clone(),
        );
        runner.cancel_flag().store(true, Ordering::SeqCst);

        let outcome = runner.run(&creds()).await;
        assert!(matches!(outcome, RunOutcome::Aborted(_)));
        assert!(recorder.messages().is_empty());
        assert_eq!(transport.requests().len(), 3);
    }
}
