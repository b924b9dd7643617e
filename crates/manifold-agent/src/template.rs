// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Expand `{{path}}` placeholders in `template` against a JSON root.
///
/// Paths are dot-separated lookups into the input (`{{user.name}}`).
/// String values are inserted verbatim; other values are rendered as JSON.
/// Unknown placeholders are left as-is.
pub fn expand(template: &str, input: &Value) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            // Unterminated placeholder: keep the tail verbatim.
            out.push_str(&rest[open..]);
            return out;
        };
        let path = after[..close].trim();
        match lookup(input, path) {
            Some(Value::String(s)) => out.push_str(s),
            Some(value) => out.push_str(&value.to_string()),
            None => {
                out.push_str(&rest[open..open + 2 + close + 2]);
            }
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn simple_substitution() {
        let out = expand("Hello {{name}}!", &json!({"name": "world"}));
        assert_eq!(out, "Hello world!");
    }

    #[test]
    fn dotted_paths_walk_nested_objects() {
        let input = json!({"user": {"name": "Ada", "langs": ["rust", "go"]}});
        assert_eq!(expand("{{user.name}} likes {{user.langs.0}}", &input), "Ada likes rust");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let input = json!({"count": 3, "tags": ["a", "b"]});
        assert_eq!(expand("n={{count}} tags={{tags}}", &input), "n=3 tags=[\"a\",\"b\"]");
    }

    #[test]
    fn unknown_placeholder_is_left_as_is() {
        assert_eq!(expand("{{missing}} stays", &json!({})), "{{missing}} stays");
    }

    #[test]
    fn unterminated_placeholder_is_left_as_is() {
        assert_eq!(expand("broken {{tail", &json!({"tail": "x"})), "broken {{tail");
    }

    #[test]
    fn repeated_placeholders_all_expand() {
        let out = expand("{{x}} and {{x}}", &json!({"x": "again"}));
        assert_eq!(out, "again and again");
    }

    #[test]
    fn whitespace_in_braces_is_tolerated() {
        assert_eq!(expand("{{ name }}", &json!({"name": "ok"})), "ok");
    }

    #[test]
    fn template_without_placeholders_passes_through() {
        assert_eq!(expand("plain text", &json!({})), "plain text");
    }
}
