//! Field templates for profile-update submissions.
//!
//! A capture is the flat `captura` object the registry update endpoints
//! take. Templates name each field and where its value comes from; most
//! values are copied from the `generales` and `domicilio` sections of the
//! recovered registry record.

use super::forms::FormSettings;
use crate::codec::ParamMap;
use crate::types::Profile;
use chrono::NaiveDate;
use serde_json::{json, Value};

/// Where a capture field gets its value.
#[derive(Debug, Clone, Copy)]
pub enum Source {
    Const(&'static str),
    Int(i64),
    Ruc,
    Dv,
    /// Today as `dd/mm/YYYY`.
    Today,
    /// Current year as `YYYY`.
    Year,
    /// `generales.<key>`, empty string when absent.
    General(&'static str),
    /// `generales.<key>` as-is, `null` when absent.
    GeneralRaw(&'static str),
    /// `domicilio.<key>`, empty string when absent.
    Domicile(&'static str),
    /// `domicilio.<key>` as-is, `null` when absent.
    DomicileRaw(&'static str),
    /// `(<prefix>)<suffix>` from the first mobile number.
    Mobile,
    ActivityName,
    ActivityCode,
    ActivityShare,
}

/// Inputs a template is evaluated against.
pub struct CaptureScope<'a> {
    pub profile: &'a Profile,
    pub recovered: &'a Value,
    pub today: NaiveDate,
    pub settings: &'a FormSettings,
}

impl CaptureScope<'_> {
    fn section(&self, name: &str, key: &str) -> Option<&Value> {
        self.recovered.get(name).and_then(|s| s.get(key))
    }

    fn text(&self, name: &str, key: &str) -> Value {
        match self.section(name, key) {
            Some(Value::Null) | None => Value::String(String::new()),
            Some(v) => v.clone(),
        }
    }

    fn raw(&self, name: &str, key: &str) -> Value {
        self.section(name, key).cloned().unwrap_or(Value::Null)
    }

    fn plain(&self, name: &str, key: &str) -> String {
        match self.section(name, key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(v) => v.to_string(),
        }
    }

    pub fn value(&self, source: Source) -> Value {
        match source {
            Source::Const(s) => Value::String(s.to_string()),
            Source::Int(n) => json!(n),
            Source::Ruc => Value::String(self.profile.ruc.clone()),
            Source::Dv => Value::String(self.profile.dv.clone()),
            Source::Today => Value::String(self.today.format("%d/%m/%Y").to_string()),
            Source::Year => Value::String(self.today.format("%Y").to_string()),
            Source::General(key) => self.text("generales", key),
            Source::GeneralRaw(key) => self.raw("generales", key),
            Source::Domicile(key) => self.text("domicilio", key),
            Source::DomicileRaw(key) => self.raw("domicilio", key),
            Source::Mobile => Value::String(format!(
                "({}){}",
                self.plain("domicilio", "domicilioCelular01Prefijo"),
                self.plain("domicilio", "domicilioCelular01Sufijo")
            )),
            Source::ActivityName => Value::String(self.settings.activity.name.clone()),
            Source::ActivityCode => Value::String(self.settings.activity.code.clone()),
            Source::ActivityShare => json!(self.settings.activity.share),
        }
    }

    /// Evaluate a template into `into`, overwriting existing keys in place.
    pub fn fill(&self, template: &[(&'static str, Source)], into: &mut ParamMap) {
        for (key, source) in template {
            into.insert((*key).to_string(), self.value(*source));
        }
    }
}
