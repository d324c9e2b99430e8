//! `{{var}}` substitution plus `{{#if}}`/`{{#unless}}` conditional blocks.
//!
//! Grounded in `original_source/src/prompts/template_engine.py`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static IF_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{#if (\w+)\}\}(.*?)\{\{/if\}\}").unwrap());
static UNLESS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{#unless (\w+)\}\}(.*?)\{\{/unless\}\}").unwrap());
static VAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").unwrap());

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_default()
        }
        other => other.to_string(),
    }
}

/// Renders `template` against `context`. Conditional blocks are resolved
/// first (non-greedily, spanning multiple lines), then plain `{{var}}`
/// substitution runs over what remains. Unknown variables render as
/// `[MISSING:name]` rather than failing.
pub fn render(template: &str, context: &HashMap<String, Value>) -> String {
    let mut rendered = IF_BLOCK
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            let body = &caps[2];
            match context.get(name) {
                Some(v) if is_truthy(v) => body.to_string(),
                _ => String::new(),
            }
        })
        .to_string();

    rendered = UNLESS_BLOCK
        .replace_all(&rendered, |caps: &regex::Captures| {
            let name = &caps[1];
            let body = &caps[2];
            match context.get(name) {
                Some(v) if is_truthy(v) => String::new(),
                _ => body.to_string(),
            }
        })
        .to_string();

    VAR.replace_all(&rendered, |caps: &regex::Captures| {
        let name = &caps[1];
        match context.get(name) {
            Some(v) => stringify(v),
            None => format!("[MISSING:{name}]"),
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn substitutes_plain_variables() {
        let out = render("Hello {{name}}!", &ctx(&[("name", Value::String("Ada".into()))]));
        assert_eq!(out, "Hello Ada!");
    }

    #[test]
    fn missing_variable_renders_placeholder() {
        let out = render("Hi {{name}}", &HashMap::new());
        assert_eq!(out, "Hi [MISSING:name]");
    }

    #[test]
    fn if_block_renders_only_when_truthy() {
        let tpl = "{{#if show}}visible{{/if}}";
        assert_eq!(render(tpl, &ctx(&[("show", Value::Bool(true))])), "visible");
        assert_eq!(render(tpl, &ctx(&[("show", Value::Bool(false))])), "");
    }

    #[test]
    fn unless_block_is_inverse_of_if() {
        let tpl = "{{#unless hide}}shown{{/unless}}";
        assert_eq!(render(tpl, &HashMap::new()), "shown");
        assert_eq!(render(tpl, &ctx(&[("hide", Value::Bool(true))])), "");
    }

    #[test]
    fn lists_render_as_pretty_json() {
        let out = render("{{items}}", &ctx(&[("items", serde_json::json!(["a", "b"]))]));
        assert!(out.contains('['));
        assert!(out.contains("\"a\""));
    }
}
