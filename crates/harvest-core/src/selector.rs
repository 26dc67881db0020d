//! Extraction expressions used by the static and dynamic strategies.
//!
//! | expression      | yields                                          |
//! |-----------------|-------------------------------------------------|
//! | `meta:<name>`   | `content` attribute of `<meta name="<name>">`   |
//! | `<css>@<attr>`  | attribute `<attr>` of the first match           |
//! | `<css>:all`     | trimmed text of every match, in document order  |
//! | `<css>`         | trimmed text of the first match                 |
//!
//! A rule that matches nothing yields [`SelectorRule::empty_value`].

use std::collections::BTreeMap;

/// A parsed extraction expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorRule {
    Meta { name: String },
    Attr { css: String, attr: String },
    AllText { css: String },
    Text { css: String },
}

impl SelectorRule {
    pub fn parse(expr: &str) -> Self {
        let expr = expr.trim();

        if let Some(name) = expr.strip_prefix("meta:") {
            return SelectorRule::Meta {
                name: name.trim().to_string(),
            };
        }

        if let Some((css, attr)) = expr.rsplit_once('@')
            && is_attr_name(attr)
            && !css.trim().is_empty()
        {
            return SelectorRule::Attr {
                css: css.trim().to_string(),
                attr: attr.to_string(),
            };
        }

        if let Some(css) = expr.strip_suffix(":all") {
            return SelectorRule::AllText {
                css: css.trim().to_string(),
            };
        }

        SelectorRule::Text {
            css: expr.to_string(),
        }
    }

    /// CSS selector this rule queries.
    pub fn css(&self) -> String {
        match self {
            SelectorRule::Meta { name } => format!("meta[name=\"{}\"]", name.replace('"', "\\\"")),
            SelectorRule::Attr { css, .. }
            | SelectorRule::AllText { css }
            | SelectorRule::Text { css } => css.clone(),
        }
    }

    /// Value reported when nothing matches.
    pub fn empty_value(&self) -> serde_json::Value {
        match self {
            SelectorRule::AllText { .. } => serde_json::Value::Array(Vec::new()),
            _ => serde_json::Value::String(String::new()),
        }
    }
}

fn is_attr_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
}

/// An output field paired with its parsed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractAction {
    pub field: String,
    pub rule: SelectorRule,
}

/// Compile a selector map into an ordered action list (key order).
pub fn compile(selectors: &BTreeMap<String, String>) -> Vec<ExtractAction> {
    selectors
        .iter()
        .map(|(field, expr)| ExtractAction {
            field: field.clone(),
            rule: SelectorRule::parse(expr),
        })
        .collect()
}
