//! Structural extraction from server-rendered portal pages.
//!
//! Only attributes are read; nothing is executed. The HTML5 parser recovers
//! from unclosed or malformed tags, so extraction never fails. A document
//! with nothing recognisable simply yields empty results.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

/// Attribute carrying the AngularJS controller binding.
pub const CONTROLLER_ATTR: &str = "data-ng-controller";

/// Attribute carrying the AngularJS initialisation expression.
pub const INIT_ATTR: &str = "data-ng-init";

/// An `<input>` element and its attributes in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputElement {
    pub attrs: Vec<(String, String)>,
}

impl InputElement {
    /// Attribute value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn name(&self) -> &str {
        self.get("name").unwrap_or("")
    }

    pub fn value(&self) -> &str {
        self.get("value").unwrap_or("")
    }
}

fn input_selector() -> Option<&'static Selector> {
    static SEL: OnceLock<Option<Selector>> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("input").ok()).as_ref()
}

fn document_arg_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'([^']+)'").expect("document argument regex is valid"))
}

/// Every `<input>` in document order, duplicates included.
pub fn parse_inputs(html: &str) -> Vec<InputElement> {
    let Some(sel) = input_selector() else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(sel)
        .map(|el| InputElement {
            attrs: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
        .collect()
}

/// Value of `init_attr` on the first element whose `binding_attr` contains `needle`.
pub fn init_value(html: &str, binding_attr: &str, needle: &str, init_attr: &str) -> Option<String> {
    let sel = Selector::parse(&format!("[{binding_attr}]")).ok()?;
    let document = Html::parse_document(html);
    document
        .select(&sel)
        .find(|el| {
            el.value()
                .attr(binding_attr)
                .is_some_and(|binding| binding.contains(needle))
        })
        .and_then(|el| el.value().attr(init_attr))
        .map(str::to_string)
}

/// `data-ng-init` of the first element bound to a controller matching `controller`.
pub fn ng_init_for_controller(html: &str, controller: &str) -> Option<String> {
    init_value(html, CONTROLLER_ATTR, controller, INIT_ATTR)
}

/// First single-quoted argument of an init expression, trailing commas removed.
///
/// `vm.init('4711,', 'x')` yields `4711`.
pub fn first_quoted_argument(expr: &str) -> Option<String> {
    let caps = document_arg_regex().captures(expr)?;
    let arg = caps.get(1)?.as_str().trim_end_matches(',');
    if arg.is_empty() {
        None
    } else {
        Some(arg.to_string())
    }
}

pub fn contains_marker(body: &str, marker: &str) -> bool {
    body.contains(marker)
}

/// Raw (still percent-encoded) value of a query parameter in a possibly relative URL.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name && !v.is_empty()).then(|| v.to_string())
    })
}
