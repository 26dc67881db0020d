use harvest_core::selector::{ExtractAction, SelectorRule};
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};

/// Apply extraction actions to an HTML document.
///
/// Every action yields a key in the output object. Invalid CSS and
/// selectors matching nothing produce the rule's empty value.
pub fn extract_html(html: &str, actions: &[ExtractAction]) -> Value {
    let document = Html::parse_document(html);
    let mut out = Map::with_capacity(actions.len());

    for action in actions {
        let value = match Selector::parse(&action.rule.css()) {
            Ok(selector) => apply(&document, &selector, &action.rule),
            Err(e) => {
                tracing::debug!(field = %action.field, error = %e, "Invalid CSS selector");
                action.rule.empty_value()
            }
        };
        out.insert(action.field.clone(), value);
    }

    Value::Object(out)
}

fn apply(document: &Html, selector: &Selector, rule: &SelectorRule) -> Value {
    match rule {
        SelectorRule::AllText { .. } => Value::Array(
            document
                .select(selector)
                .map(|el| Value::String(element_text(el)))
                .collect(),
        ),
        SelectorRule::Text { .. } => document
            .select(selector)
            .next()
            .map(|el| Value::String(element_text(el)))
            .unwrap_or_else(|| rule.empty_value()),
        SelectorRule::Attr { attr, .. } => first_attr(document, selector, attr)
            .map(Value::String)
            .unwrap_or_else(|| rule.empty_value()),
        SelectorRule::Meta { .. } => first_attr(document, selector, "content")
            .map(|c| Value::String(c.trim().to_string()))
            .unwrap_or_else(|| rule.empty_value()),
    }
}

fn first_attr(document: &Html, selector: &Selector, attr: &str) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// JavaScript expression evaluating one rule against the live DOM.
///
/// Mirrors [`extract_html`]: misses and selector syntax errors evaluate to
/// the rule's empty value instead of throwing.
pub fn dom_script(rule: &SelectorRule) -> String {
    // JSON string literals are valid JS string literals.
    let css = serde_json::to_string(&rule.css()).unwrap_or_else(|_| "\"\"".into());
    let body = match rule {
        SelectorRule::AllText { .. } => format!(
            "return Array.from(document.querySelectorAll({css})).map(e => (e.textContent || '').trim());"
        ),
        SelectorRule::Text { .. } => format!(
            "const el = document.querySelector({css}); return el ? (el.textContent || '').trim() : '';"
        ),
        SelectorRule::Attr { attr, .. } => {
            let attr = serde_json::to_string(attr).unwrap_or_else(|_| "\"\"".into());
            format!(
                "const el = document.querySelector({css}); return el ? (el.getAttribute({attr}) ?? '') : '';"
            )
        }
        SelectorRule::Meta { .. } => format!(
            "const el = document.querySelector({css}); return el ? (el.getAttribute('content') ?? '').trim() : '';"
        ),
    };
    let empty = match rule {
        SelectorRule::AllText { .. } => "[]",
        _ => "''",
    };
    format!("(() => {{ try {{ {body} }} catch (_) {{ return {empty}; }} }})()")
}
