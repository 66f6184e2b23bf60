//! Portal data shapes shared by the orchestrator and the form pipelines.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accept either a JSON string or number and keep it as text.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Taxpayer profile from `perfil/publico`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Profile {
    #[serde(rename = "rucActivo", default, deserialize_with = "lenient_string")]
    pub ruc: String,
    #[serde(rename = "dvActivo", default, deserialize_with = "lenient_string")]
    pub dv: String,
    #[serde(rename = "nombre", default, deserialize_with = "lenient_string")]
    pub name: String,
}

impl Profile {
    /// Greeting name: the second word of the registered name when there is one.
    pub fn first_name(&self) -> &str {
        let mut parts = self.name.split_whitespace();
        let first = parts.next();
        parts.next().or(first).unwrap_or("User")
    }
}

/// A form awaiting filing, from `perfil/vencimientos`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PendingForm {
    #[serde(rename = "impuesto", default, deserialize_with = "lenient_string")]
    pub form: String,
    #[serde(rename = "periodo", default, deserialize_with = "lenient_string")]
    pub period: String,
}

/// One application in the taxpayer menu.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MenuEntry {
    #[serde(rename = "aplicacion", default, deserialize_with = "lenient_string")]
    pub code: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(rename = "nombre", default, deserialize_with = "lenient_string")]
    pub name: String,
}

/// Menu lookup by application code.
pub fn menu_url<'a>(menu: &'a [MenuEntry], code: &str) -> Option<&'a str> {
    menu.iter()
        .find(|entry| entry.code == code)
        .map(|entry| entry.url.as_str())
        .filter(|url| !url.is_empty())
}

/// A profile section the portal wants updated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileLink {
    #[serde(rename = "texto", default, deserialize_with = "lenient_string")]
    pub text: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
}

impl ProfileLink {
    /// `"Registro de Contribuyentes"` becomes `registro_de_contribuyentes`.
    pub fn handler_key(&self) -> String {
        self.text.to_lowercase().replace(' ', "_")
    }
}

/// Response of `perfil/informacionControlesPerfil`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileControls {
    #[serde(rename = "debeActualizar", default)]
    pub must_update: bool,
    #[serde(rename = "vinculos", default)]
    pub links: Vec<ProfileLink>,
}

/// What a pipeline run operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// Fiscal period, `YYYYMM`.
    Period(String),
    /// Host-relative link to a profile update page.
    Link(String),
}

/// Everything one pipeline invocation needs to know about the taxpayer.
#[derive(Debug, Clone)]
pub struct FormContext {
    pub profile: Profile,
    pub menu: Vec<MenuEntry>,
    pub subject: Subject,
}

impl FormContext {
    pub fn period(&self) -> Option<&str> {
        match &self.subject {
            Subject::Period(p) => Some(p),
            Subject::Link(_) => None,
        }
    }

    pub fn link(&self) -> Option<&str> {
        match &self.subject {
            Subject::Link(l) => Some(l),
            Subject::Period(_) => None,
        }
    }
}

/// The period currently open for filing: the previous month as `YYYYMM`.
pub fn current_period(today: NaiveDate) -> String {
    let (year, month) = if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    };
    format!("{year}{month:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_period_wraps_year() {
        let jan = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(current_period(jan), "202312");
        let oct = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        assert_eq!(current_period(oct), "202609");
    }

    #[test]
    fn test_numeric_fields_become_text() {
        let pending: Vec<PendingForm> =
            serde_json::from_str(r#"[{"impuesto":211,"periodo":"202409"},{"impuesto":"955"}]"#)
                .unwrap();
        assert_eq!(pending[0].form, "211");
        assert_eq!(pending[1].form, "955");
        assert_eq!(pending[1].period, "");
    }

    #[test]
    fn test_profile_and_greeting() {
        let profile: Profile = serde_json::from_str(
            r#"{"rucActivo":"80000000","dvActivo":5,"nombre":"PEREZ JUAN CARLOS"}"#,
        )
        .unwrap();
        assert_eq!(profile.dv, "5");
        assert_eq!(profile.first_name(), "JUAN");
        assert_eq!(Profile::default().first_name(), "User");
    }

    #[test]
    fn test_link_handler_key_and_menu_lookup() {
        let link = ProfileLink {
            text: "Registro de Contribuyentes".into(),
            url: "/eset/x".into(),
        };
        assert_eq!(link.handler_key(), "registro_de_contribuyentes");

        let menu: Vec<MenuEntry> = serde_json::from_str(
            r#"[{"aplicacion":"SG00005","url":"declaracion/x"},{"aplicacion":"DI03100","url":""}]"#,
        )
        .unwrap();
        assert_eq!(menu_url(&menu, "SG00005"), Some("declaracion/x"));
        assert_eq!(menu_url(&menu, "DI03100"), None);
        assert_eq!(menu_url(&menu, "XX"), None);
    }
}
