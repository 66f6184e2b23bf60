//! Form pipeline engine.
//!
//! Each supported form is a static list of [`Step`]s (see [`forms`]). One
//! interpreter walks the list against the portal: fetch a page, check for a
//! marker, build a `t3` token, post a body, judge the JSON reply, harvest
//! fields, follow the server's redirect. The first failing step aborts the
//! run with its reason; nothing is retried, so a submission is attempted at
//! most once per invocation.

pub mod capture;
pub mod envelope;
pub mod forms;
pub mod merge;

use crate::codec::{self, ParamMap};
use crate::error::{PortalError, PortalResult};
use crate::markup;
use crate::transport::{Portal, Transport};
use crate::types::{menu_url, FormContext};
use capture::{CaptureScope, Source};
use chrono::NaiveDate;
use envelope::Rule;
use merge::MergePolicy;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub use forms::{FormDefinition, FormKind, FormSettings};

/// Which prefix a server-supplied relative URL is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    /// `https://host` + url
    Host,
    /// `https://host/eset/` + url
    Base,
}

/// Where a fetch or post goes.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    /// Menu application URL under the base. `missing` is the failure reason
    /// when the taxpayer menu lacks the code.
    Menu {
        code: &'static str,
        missing: &'static str,
    },
    /// The profile-update link the run was started with, on the host.
    Link,
    /// Fixed path under the base.
    Endpoint(&'static str),
    /// Fixed path under the base with `?t3=<last token>`.
    Tokenized(&'static str),
    /// A URL captured by an earlier step.
    Var { var: &'static str, root: Root },
}

/// A value placed in a token or JSON body.
#[derive(Debug, Clone, Copy)]
pub enum Param {
    Ruc,
    Dv,
    /// Fiscal period as text.
    Period,
    /// Fiscal period as a number.
    PeriodInt,
    Str(&'static str),
    Int(i64),
    Null,
    Var(&'static str),
    /// The capture built so far.
    Capture,
}

/// JSON body of a post.
#[derive(Debug, Clone, Copy)]
pub enum Body {
    /// `{}`
    Empty,
    /// The merged declaration fields.
    Submission,
    Object(&'static [(&'static str, Param)]),
}

/// One pipeline instruction.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Paced GET; the body becomes the current page.
    Fetch { label: &'static str, target: Target },
    /// Fail unless the current page contains `marker`.
    ExpectMarker {
        marker: &'static str,
        reason: &'static str,
    },
    /// Encrypt an ordered parameter map into the token used by `Tokenized`.
    Token(&'static [(&'static str, Param)]),
    /// Paced JSON POST; the body becomes the current page.
    Post {
        label: &'static str,
        target: Target,
        body: Body,
    },
    /// Decode the current page as JSON. `label` names the step in errors.
    ParseJson { label: &'static str },
    /// Judge a success flag; a failure reports the portal's first error or `fallback`.
    Check {
        field: &'static str,
        rule: Rule,
        fallback: &'static str,
    },
    /// The current page must be an empty JSON array; otherwise its text is the error.
    ExpectEmptyArray,
    /// Pick `field` of the array element whose `key` equals `equals`.
    SelectFromArray {
        key: &'static str,
        equals: &'static str,
        field: &'static str,
        var: &'static str,
        missing: &'static str,
    },
    /// Unpaced GET of the URL in `field` of the last JSON reply. The URL is
    /// kept as variable `field`. Optional follows skip silently.
    Follow {
        field: &'static str,
        root: Root,
        required: bool,
    },
    /// Harvest the page's inputs into the submission, seeded with the
    /// `_cyp` parameter of variable `cyp_from`.
    MergeInputs {
        policy: &'static MergePolicy,
        cyp_from: &'static str,
    },
    /// Start a capture from the last JSON reply (the recovered record).
    BuildCapture(&'static [(&'static str, Source)]),
    /// Add fields to the capture, still reading the recovered record.
    ExtendCapture(&'static [(&'static str, Source)]),
    /// Document id from the init expression of `controller`.
    ExtractDocumentId {
        controller: &'static str,
        var: &'static str,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Fetch { label, .. } | Step::Post { label, .. } => f.write_str(label),
            Step::ExpectMarker { marker, .. } => write!(f, "expecting \"{marker}\""),
            Step::Token(_) => f.write_str("encoding token"),
            Step::ParseJson { label } => f.write_str(label),
            Step::Check { field, .. } => write!(f, "checking \"{field}\""),
            Step::ExpectEmptyArray => f.write_str("validating data"),
            Step::SelectFromArray { key, equals, .. } => write!(f, "selecting {key} {equals}"),
            Step::Follow { field, .. } => write!(f, "following {field}"),
            Step::MergeInputs { .. } => f.write_str("processing form data"),
            Step::BuildCapture(_) | Step::ExtendCapture(_) => f.write_str("preparing data"),
            Step::ExtractDocumentId { .. } => f.write_str("reading document"),
        }
    }
}

/// Mutable state of one run.
#[derive(Default)]
struct RunState {
    page: String,
    json: Option<Value>,
    token: Option<String>,
    vars: HashMap<&'static str, String>,
    submission: ParamMap,
    capture: ParamMap,
    recovered: Value,
}

impl RunState {
    fn set_page(&mut self, page: String) {
        self.page = page;
        self.json = None;
    }

    fn last_json(&self) -> Option<Value> {
        self.json
            .clone()
            .or_else(|| serde_json::from_str(&self.page).ok())
    }
}

/// Runs form definitions against one session.
pub struct Pipeline<'a> {
    transport: &'a dyn Transport,
    portal: &'a Portal,
    settings: &'a FormSettings,
    cancel: Arc<AtomicBool>,
    today: NaiveDate,
}

impl<'a> Pipeline<'a> {
    pub fn new(transport: &'a dyn Transport, portal: &'a Portal, settings: &'a FormSettings) -> Self {
        Self {
            transport,
            portal,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Flag checked before every step; setting it stops the run cleanly.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Execute every step of `form`. Returns the success message.
    pub async fn run(&self, form: &FormDefinition, ctx: &FormContext) -> PortalResult<String> {
        info!(form = form.id, "starting {}", form.title);
        let mut state = RunState::default();
        for (index, step) in form.steps.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(PortalError::Cancelled(step.to_string()));
            }
            debug!(form = form.id, index, step = %step, "step");
            self.execute(step, ctx, &mut state).await?;
        }
        Ok(form.success_message(ctx))
    }

    async fn execute(&self, step: &Step, ctx: &FormContext, state: &mut RunState) -> PortalResult<()> {
        match *step {
            Step::Fetch { label, target } => {
                info!("{label}");
                let url = self.resolve(target, ctx, state, step)?;
                self.transport.pace().await;
                let page = self.transport.get(&url).await?;
                state.set_page(page);
            }
            Step::ExpectMarker { marker, reason } => {
                if !markup::contains_marker(&state.page, marker) {
                    return Err(PortalError::protocol(step.to_string(), reason));
                }
            }
            Step::Token(params) => {
                let map = self.params(params, ctx, state, step)?;
                state.token = Some(codec::encode(&map));
            }
            Step::Post { label, target, body } => {
                info!("{label}");
                let url = self.resolve(target, ctx, state, step)?;
                let json = match body {
                    Body::Empty => "{}".to_string(),
                    Body::Submission => codec::compact_json(&Value::Object(state.submission.clone())),
                    Body::Object(fields) => {
                        codec::compact_json(&Value::Object(self.params(fields, ctx, state, step)?))
                    }
                };
                self.transport.pace().await;
                let page = self.transport.post_json(&url, &json).await?;
                state.set_page(page);
            }
            Step::ParseJson { label } => match serde_json::from_str::<Value>(&state.page) {
                Ok(json) => state.json = Some(json),
                Err(e) => {
                    debug!(error = %e, "undecodable reply");
                    return Err(PortalError::protocol(label, "invalid response"));
                }
            },
            Step::Check { field, rule, fallback } => {
                let json = state.last_json().unwrap_or(Value::Null);
                if !envelope::passes(&json, field, rule) {
                    let reason = envelope::first_error(&json).unwrap_or_else(|| fallback.to_string());
                    return Err(PortalError::Business(reason));
                }
            }
            Step::ExpectEmptyArray => {
                let reply = state.page.trim();
                let empty = matches!(serde_json::from_str::<Value>(reply), Ok(Value::Array(a)) if a.is_empty());
                if !empty {
                    return Err(PortalError::Business(reply.to_string()));
                }
            }
            Step::SelectFromArray {
                key,
                equals,
                field,
                var,
                missing,
            } => {
                let json = state.last_json().unwrap_or(Value::Null);
                let found = json.as_array().and_then(|items| {
                    items
                        .iter()
                        .find(|item| envelope::text_field(item, key).as_deref() == Some(equals))
                        .and_then(|item| envelope::text_field(item, field))
                });
                match found {
                    Some(value) => {
                        state.vars.insert(var, value);
                    }
                    None => return Err(PortalError::protocol(step.to_string(), missing)),
                }
            }
            Step::Follow { field, root, required } => {
                let link = state
                    .last_json()
                    .and_then(|json| envelope::text_field(&json, field));
                let Some(link) = link else {
                    if required {
                        return Err(PortalError::protocol(step.to_string(), "no redirect url"));
                    }
                    debug!(field, "nothing to follow");
                    return Ok(());
                };
                let url = self.rooted(root, &link);
                state.vars.insert(field, link);
                let page = self.transport.get(&url).await?;
                state.set_page(page);
            }
            Step::MergeInputs { policy, cyp_from } => {
                let cyp = state
                    .vars
                    .get(cyp_from)
                    .and_then(|url| markup::query_param(url, "_cyp"))
                    .unwrap_or_default();
                let mut submission = ParamMap::new();
                submission.insert("_cyp".into(), Value::String(cyp));
                for (k, v) in policy.merge(&markup::parse_inputs(&state.page)) {
                    submission.insert(k, v);
                }
                debug!(fields = submission.len(), "declaration fields harvested");
                state.submission = submission;
            }
            Step::BuildCapture(template) => {
                state.recovered = state.last_json().unwrap_or(Value::Null);
                let mut capture = ParamMap::new();
                self.scope(ctx, &state.recovered).fill(template, &mut capture);
                state.capture = capture;
            }
            Step::ExtendCapture(template) => {
                let mut capture = std::mem::take(&mut state.capture);
                self.scope(ctx, &state.recovered).fill(template, &mut capture);
                state.capture = capture;
            }
            Step::ExtractDocumentId { controller, var } => {
                let init = markup::ng_init_for_controller(&state.page, controller).ok_or_else(|| {
                    PortalError::protocol(step.to_string(), "Could not find document controller")
                })?;
                let id = markup::first_quoted_argument(&init)
                    .ok_or_else(|| PortalError::protocol(step.to_string(), "Could not parse document ID"))?;
                debug!(document = %id, "document id");
                state.vars.insert(var, id);
            }
        }
        Ok(())
    }

    fn scope<'s>(&'s self, ctx: &'s FormContext, recovered: &'s Value) -> CaptureScope<'s> {
        CaptureScope {
            profile: &ctx.profile,
            recovered,
            today: self.today,
            settings: self.settings,
        }
    }

    fn rooted(&self, root: Root, link: &str) -> String {
        match root {
            Root::Host => self.portal.on_host(link),
            Root::Base => self.portal.endpoint(link),
        }
    }

    fn resolve(&self, target: Target, ctx: &FormContext, state: &RunState, step: &Step) -> PortalResult<String> {
        match target {
            Target::Menu { code, missing } => menu_url(&ctx.menu, code)
                .map(|url| self.portal.endpoint(url))
                .ok_or_else(|| PortalError::protocol(step.to_string(), missing)),
            Target::Link => ctx
                .link()
                .map(|link| self.portal.on_host(link))
                .ok_or_else(|| PortalError::protocol(step.to_string(), "no profile link")),
            Target::Endpoint(path) => Ok(self.portal.endpoint(path)),
            Target::Tokenized(path) => state
                .token
                .as_deref()
                .map(|token| self.portal.tokenized(path, token))
                .ok_or_else(|| PortalError::protocol(step.to_string(), "no token")),
            Target::Var { var, root } => state
                .vars
                .get(var)
                .map(|link| self.rooted(root, link))
                .ok_or_else(|| PortalError::protocol(step.to_string(), format!("no {var}"))),
        }
    }

    fn params(
        &self,
        params: &[(&'static str, Param)],
        ctx: &FormContext,
        state: &RunState,
        step: &Step,
    ) -> PortalResult<ParamMap> {
        let mut map = ParamMap::new();
        for (key, param) in params {
            let value = match *param {
                Param::Ruc => Value::String(ctx.profile.ruc.clone()),
                Param::Dv => Value::String(ctx.profile.dv.clone()),
                Param::Period => Value::String(self.period(ctx, step)?.to_string()),
                Param::PeriodInt => {
                    let period = self.period(ctx, step)?;
                    let n: i64 = period
                        .parse()
                        .map_err(|_| PortalError::protocol(step.to_string(), format!("invalid period {period}")))?;
                    Value::from(n)
                }
                Param::Str(s) => Value::String(s.to_string()),
                Param::Int(n) => Value::from(n),
                Param::Null => Value::Null,
                Param::Var(var) => state
                    .vars
                    .get(var)
                    .cloned()
                    .map(Value::String)
                    .ok_or_else(|| PortalError::protocol(step.to_string(), format!("no {var}")))?,
                Param::Capture => Value::Object(state.capture.clone()),
            };
            map.insert((*key).to_string(), value);
        }
        Ok(map)
    }

    fn period<'c>(&self, ctx: &'c FormContext, step: &Step) -> PortalResult<&'c str> {
        ctx.period()
            .ok_or_else(|| PortalError::protocol(step.to_string(), "no fiscal period"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::ScriptedTransport;
    use crate::transport::Method;
    use crate::types::{MenuEntry, Profile, Subject};

    const FORM_HTML: &str = r#"
        <form>
          <input name="dynamicProps(C1)" value="1000">
          <input name="C2" value="skip">
          <input name="segundoApellido" value="">
          <input name="exportador" value="1">
          <input name="fechaDiferida" value="">
          <input name="dynamicProps(C5)" value="">
        </form>"#;

    fn ctx(subject: Subject) -> FormContext {
        FormContext {
            profile: Profile {
                ruc: "80000000".into(),
                dv: "5".into(),
                name: "PEREZ JUAN".into(),
            },
            menu: vec![
                MenuEntry {
                    code: "SG00005".into(),
                    url: "declaracion/contribuyente".into(),
                    name: String::new(),
                },
                MenuEntry {
                    code: "DI03100".into(),
                    url: "gdi/di/gestion".into(),
                    name: String::new(),
                },
            ],
            subject,
        }
    }

    fn period() -> FormContext {
        ctx(Subject::Period("202409".into()))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 5).unwrap()
    }

    #[tokio::test]
    async fn test_vat_happy_path() {
        let transport = ScriptedTransport::new()
            .reply("declaracion/contribuyente", "<h1>Presentar Declaración</h1>")
            .reply(
                "declaracion/permite",
                r#"{"permite":true,"url":"/eset/declaracion/formulario?x=1&_cyp=Zm9v%2B"}"#,
            )
            .reply("declaracion/formulario", FORM_HTML)
            .reply("/presentar", r#"{"exito":true}"#);
        let settings = FormSettings::default();
        let portal = Portal::default();

        let message = Pipeline::new(&transport, &portal, &settings)
            .with_today(today())
            .run(&forms::VAT, &period())
            .await
            .unwrap();
        assert_eq!(message, "VAT filed successfully!");

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(
            requests[0].url,
            "https://marangatu.set.gov.py/eset/declaracion/contribuyente"
        );
        let permit = codec::encode(
            serde_json::json!({
                "ruc": "80000000", "dv": "5", "periodo": "202409",
                "impuesto": "211", "formulario": "120", "fechaDiferida": null
            })
            .as_object()
            .unwrap(),
        );
        assert!(requests[1].url.ends_with(&format!("declaracion/permite?t3={permit}")));
        assert_eq!(
            requests[2].url,
            "https://marangatu.set.gov.py/eset/declaracion/formulario?x=1&_cyp=Zm9v%2B"
        );
        assert_eq!(requests[3].method, Method::Post);
        assert_eq!(
            requests[3].body.as_deref(),
            Some(r#"{"_cyp":"Zm9v%2B","C1":"1000","segundoApellido":"","exportador":"0","C5":"0"}"#)
        );
    }

    #[tokio::test]
    async fn test_vat_business_error() {
        let transport = ScriptedTransport::new()
            .reply("declaracion/contribuyente", "Presentar Declaración")
            .reply("declaracion/permite", r#"{"permite":true,"url":"/eset/f?_cyp=a"}"#)
            .reply("/eset/f", FORM_HTML)
            .reply(
                "/presentar",
                r#"{"exito":false,"operacion":{"errores":[{"descripcion":"Ya existe una declaración"}]}}"#,
            );
        let settings = FormSettings::default();
        let portal = Portal::default();

        let err = Pipeline::new(&transport, &portal, &settings)
            .run(&forms::VAT, &period())
            .await
            .unwrap_err();
        match err {
            PortalError::Business(reason) => assert_eq!(reason, "Ya existe una declaración"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_vat_empty_reply_uses_fallback() {
        let transport = ScriptedTransport::new()
            .reply("declaracion/contribuyente", "Presentar Declaración")
            .reply("declaracion/permite", r#"{"permite":true,"url":"/eset/f?_cyp=a"}"#)
            .reply("/eset/f", FORM_HTML)
            .reply("/presentar", r#"{}"#);
        let settings = FormSettings::default();
        let portal = Portal::default();

        let err = Pipeline::new(&transport, &portal, &settings)
            .run(&forms::VAT, &period())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "No response received when filing VAT. Try again later."
        );
    }

    #[tokio::test]
    async fn test_abort_on_first_failure() {
        // Marker missing: nothing after the first fetch may be requested.
        let transport = ScriptedTransport::new()
            .reply("declaracion/contribuyente", "<html>mantenimiento</html>")
            .reply("declaracion/permite", r#"{"permite":true,"url":"/x"}"#)
            .reply("/presentar", r#"{"exito":true}"#);
        let settings = FormSettings::default();
        let portal = Portal::default();

        let err = Pipeline::new(&transport, &portal, &settings)
            .run(&forms::VAT, &period())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Protocol { .. }));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.remaining(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts() {
        let transport = ScriptedTransport::new()
            .reply("declaracion/contribuyente", "Presentar Declaración");
        let settings = FormSettings::default();
        let portal = Portal::default();

        let err = Pipeline::new(&transport, &portal, &settings)
            .run(&forms::VAT, &period())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Transport(_)));
        assert!(err.to_string().starts_with("I/O failure"));
    }

    #[tokio::test]
    async fn test_invalid_json_names_step() {
        let transport = ScriptedTransport::new()
            .reply("declaracion/contribuyente", "Presentar Declaración")
            .reply("declaracion/permite", "<html>error</html>");
        let settings = FormSettings::default();
        let portal = Portal::default();

        let err = Pipeline::new(&transport, &portal, &settings)
            .run(&forms::VAT, &period())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid response (checking form permission)"
        );
    }

    #[tokio::test]
    async fn test_missing_menu_entry() {
        let transport = ScriptedTransport::new();
        let settings = FormSettings::default();
        let portal = Portal::default();
        let mut context = period();
        context.menu.clear();

        let err = Pipeline::new(&transport, &portal, &settings)
            .run(&forms::VAT, &context)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Tax payer menu not found"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let transport = ScriptedTransport::new();
        let settings = FormSettings::default();
        let portal = Portal::default();
        let cancel = Arc::new(AtomicBool::new(true));

        let err = Pipeline::new(&transport, &portal, &settings)
            .with_cancel(cancel)
            .run(&forms::RECEIPTS, &period())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Cancelled(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_receipts_happy_path() {
        let transport = ScriptedTransport::new()
            .reply("gdi/di/gestion", "<h2>Gestión de Comprobantes</h2>")
            .reply(
                "listarTiposOperaciones",
                r#"[{"id":"1","url":"a"},{"id":"6","url":"gdi/di/talonresumen/confirmar"}]"#,
            )
            .reply(
                "talonresumen/confirmar",
                "Registro de Comprobantes - Presentación de Talón",
            )
            .reply("procesarTalon", r#"{"exito":false}"#);
        let settings = FormSettings::default();
        let portal = Portal::default();

        let message = Pipeline::new(&transport, &portal, &settings)
            .run(&forms::RECEIPTS, &period())
            .await
            .unwrap();
        assert_eq!(message, "Receipts for period 202409 filed successfully!");

        let requests = transport.requests();
        let talon = codec::encode(
            serde_json::json!({"periodo": 202409, "formulario": 241})
                .as_object()
                .unwrap(),
        );
        assert_eq!(
            requests[2].url,
            "https://marangatu.set.gov.py/eset/gdi/di/talonresumen/confirmar"
        );
        assert!(requests[3].url.ends_with(&format!("procesarTalon?t3={talon}")));
        assert_eq!(requests[3].body.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_receipts_without_operation() {
        let transport = ScriptedTransport::new()
            .reply("gdi/di/gestion", "Gestión de Comprobantes")
            .reply("listarTiposOperaciones", r#"[{"id":"1","url":"a"}]"#);
        let settings = FormSettings::default();
        let portal = Portal::default();

        let err = Pipeline::new(&transport, &portal, &settings)
            .run(&forms::RECEIPTS, &period())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No access to receipt forms"));
    }

    const RECOVERED: &str = r#"{
        "generales": {"nombreCompleto": "PEREZ, JUAN", "generalesTipoDocumento": "CI",
                      "operacionesMesCierreHistorico": 12, "edicionPorcentajes": "S"},
        "domicilio": {"domicilioCelular01Prefijo": "0981", "domicilioCelular01Sufijo": "123456",
                      "domicilioLatitud": "-25.3", "domicilioLongitud": "-57.6",
                      "domicilioLocalidad": 5, "domicilioBarrio": 7}
    }"#;

    const DOCUMENT_PAGE: &str = r#"<h3>Enviar Solicitud</h3>
        <div data-ng-controller="DocumentoArchivosController as vm"
             data-ng-init="vm.init('55501,', 'S')"></div>"#;

    #[tokio::test]
    async fn test_registry_update_flow() {
        let transport = ScriptedTransport::new()
            .reply("/eset/ru/actualizacion", "Actualización de Contribuyente")
            .reply("actualizacion/recuperar", RECOVERED)
            .reply("actualizacion/verificarPaso", "[]")
            .reply("actualizacion/verificar", " [] ")
            .reply("actualizacion/guardar", r#"{"exito":true,"url":"ru/documento/1"}"#)
            .reply("ru/documento/1", DOCUMENT_PAGE)
            .reply("aceptarDocumento", r#"{"url":"ru/documento/final"}"#)
            .reply("ru/documento/final", "<html>ok</html>");
        let settings = FormSettings::default();
        let portal = Portal::default();
        let context = ctx(Subject::Link("/eset/ru/actualizacion?x=1".into()));

        let message = Pipeline::new(&transport, &portal, &settings)
            .with_today(today())
            .run(&forms::REGISTRY_UPDATE, &context)
            .await
            .unwrap();
        assert_eq!(message, "Tax payer info updated successfully!");
        assert_eq!(transport.remaining(), 0);

        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://marangatu.set.gov.py/eset/ru/actualizacion?x=1");

        let step_check: Value = serde_json::from_str(requests[2].body.as_deref().unwrap()).unwrap();
        assert_eq!(step_check["paso"], "generales");
        assert_eq!(step_check["captura"]["generalesFechaSolicitud"], "05/10/2024");
        assert_eq!(step_check["captura"]["domicilioCelular01"], "(0981)123456");
        assert_eq!(step_check["captura"]["operacionesMesCierre"], 12);
        assert!(step_check["captura"].get("edicionDomicilio").is_none());

        let verify: Value = serde_json::from_str(requests[3].body.as_deref().unwrap()).unwrap();
        assert_eq!(verify["captura"]["edicionDomicilio"], "S");
        assert_eq!(verify["captura"]["domicilioLat"], "-25.3");
        assert!(verify.get("paso").is_none());

        assert_eq!(requests[6].body.as_deref(), Some(r#"{"id":"55501"}"#));
        assert_eq!(
            requests[7].url,
            "https://marangatu.set.gov.py/eset/ru/documento/final"
        );
    }

    #[tokio::test]
    async fn test_registry_validation_error_is_reported_verbatim() {
        let transport = ScriptedTransport::new()
            .reply("/eset/ru/actualizacion", "Actualización de Contribuyente")
            .reply("actualizacion/recuperar", RECOVERED)
            .reply("actualizacion/verificarPaso", r#"[{"campo":"generalesCorreo01"}]"#);
        let settings = FormSettings::default();
        let portal = Portal::default();
        let context = ctx(Subject::Link("/eset/ru/actualizacion".into()));

        let err = Pipeline::new(&transport, &portal, &settings)
            .run(&forms::REGISTRY_UPDATE, &context)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), r#"[{"campo":"generalesCorreo01"}]"#);
    }

    #[tokio::test]
    async fn test_activity_update_uses_settings() {
        let transport = ScriptedTransport::new()
            .reply(
                "/eset/ru/porcentajes",
                "Porcentajes de Ingreso por Actividades Económicas",
            )
            .reply("actualizacion/recuperar", RECOVERED)
            .reply("actualizacion/guardar", r#"{"url":"ru/documento/2"}"#)
            .reply("ru/documento/2", DOCUMENT_PAGE)
            .reply("aceptarDocumento", "not json");
        let settings = FormSettings {
            activity: forms::EconomicActivity {
                code: "C4_62010".into(),
                name: "62010 - ACTIVIDADES DE PROGRAMACION INFORMATICA".into(),
                share: 100,
            },
        };
        let portal = Portal::default();
        let context = ctx(Subject::Link("/eset/ru/porcentajes".into()));

        let message = Pipeline::new(&transport, &portal, &settings)
            .with_today(today())
            .run(&forms::ACTIVITY_SHARES, &context)
            .await
            .unwrap();
        assert!(message.starts_with("Info on the percentage of income"));

        let save: Value =
            serde_json::from_str(transport.requests()[2].body.as_deref().unwrap()).unwrap();
        assert_eq!(save["categoria"], "PORCENTAJES_ACTIVIDAD");
        assert_eq!(save["captura"]["porcentajeActividad.1"], "C4_62010");
        assert_eq!(save["captura"]["porcentajeActividadValor.1"], 100);
        assert_eq!(save["captura"]["generalesPorcentajesActividadesAnho"], "2024");
    }

    #[tokio::test]
    async fn test_save_rejected() {
        let transport = ScriptedTransport::new()
            .reply(
                "/eset/ru/porcentajes",
                "Porcentajes de Ingreso por Actividades Económicas",
            )
            .reply("actualizacion/recuperar", RECOVERED)
            .reply("actualizacion/guardar", r#"{"exito":false}"#);
        let settings = FormSettings::default();
        let portal = Portal::default();
        let context = ctx(Subject::Link("/eset/ru/porcentajes".into()));

        let err = Pipeline::new(&transport, &portal, &settings)
            .run(&forms::ACTIVITY_SHARES, &context)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown error saving data");
    }
}
