//! Harvesting a server-rendered declaration form into a submission map.

use crate::codec::ParamMap;
use crate::markup::InputElement;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// How harvested input values are rewritten before submission.
#[derive(Debug, Clone, Copy)]
pub struct MergePolicy {
    /// Inputs never submitted.
    pub skip: &'static [&'static str],
    /// Inputs whose value is always replaced.
    pub forced: &'static [(&'static str, &'static str)],
    /// Inputs submitted as they are, even when empty.
    pub verbatim: &'static [&'static str],
    /// Inputs whose value is cleared, which drops them.
    pub blanked: &'static [&'static str],
    /// Replacement for empty or literal `null` values.
    pub empty_as: &'static str,
}

/// Rules the VAT declaration form needs.
pub const VAT_POLICY: MergePolicy = MergePolicy {
    skip: &["C2", "C3"],
    forced: &[("exportador", "0")],
    verbatim: &["segundoApellido"],
    blanked: &["fechaDiferida"],
    empty_as: "0",
};

fn dynamic_props_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^dynamicProps\(([^)]+)\)").expect("dynamicProps regex is valid"))
}

/// Field name with any `dynamicProps(...)` wrapper removed.
pub fn field_name(raw: &str) -> &str {
    dynamic_props_regex()
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(raw, |m| m.as_str())
}

impl MergePolicy {
    /// Final value for a field, or `None` when it must not be submitted.
    pub fn resolve(&self, name: &str, value: &str) -> Option<String> {
        if let Some((_, forced)) = self.forced.iter().find(|(k, _)| *k == name) {
            return Some((*forced).to_string());
        }
        if self.verbatim.contains(&name) {
            return (value != "null").then(|| value.to_string());
        }
        if self.blanked.contains(&name) {
            return None;
        }
        if value.is_empty() || value == "null" {
            return (!self.empty_as.is_empty()).then(|| self.empty_as.to_string());
        }
        Some(value.to_string())
    }

    /// Merge inputs in document order. A repeated name keeps its first
    /// position and takes the later value.
    pub fn merge(&self, inputs: &[InputElement]) -> ParamMap {
        let mut out = ParamMap::new();
        for input in inputs {
            let name = field_name(input.name());
            if name.is_empty() || self.skip.contains(&name) {
                continue;
            }
            if let Some(value) = self.resolve(name, input.value()) {
                out.insert(name.to_string(), Value::String(value));
            }
        }
        out
    }
}
