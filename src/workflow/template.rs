//! `{{variable}}` interpolation for request templates.
//!
//! A placeholder names a chain variable, optionally followed by a path into
//! its value: `{{token}}`, `{{user.id}}`, `{{items[0].name}}`. A string that
//! is exactly one placeholder is replaced by the variable's JSON value with
//! its type intact; placeholders embedded in text are rendered as text.

use indexmap::IndexMap;
use serde_json::Value;

use crate::path;
use crate::transport::RequestDescriptor;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Look up `expr` in `vars`.
///
/// A variable whose full name matches wins over a path lookup, so a variable
/// literally named `user.id` shadows `user` + `.id`.
pub fn resolve(expr: &str, vars: &IndexMap<String, Value>) -> Option<Value> {
    let expr = expr.trim();
    if let Some(value) = vars.get(expr) {
        return Some(value.clone());
    }

    let split = expr.find(['.', '[']).unwrap_or(expr.len());
    let (head, rest) = expr.split_at(split);
    let root = vars.get(head)?;
    if rest.is_empty() {
        return Some(root.clone());
    }
    path::extract(root, &format!("${}", rest))
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render every placeholder in `template` as text. Unknown variables render
/// as the empty string; an unterminated `{{` is left as-is.
pub fn render_str(template: &str, vars: &IndexMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        let expr = &after_open[..end];
        if let Some(value) = resolve(expr, vars) {
            out.push_str(&as_text(&value));
        }
        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

/// The inner expression if `s` is exactly one placeholder
fn sole_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        None
    } else {
        Some(inner)
    }
}

/// Render placeholders in every string inside `value`, recursively.
pub fn render_value(value: &Value, vars: &IndexMap<String, Value>) -> Value {
    match value {
        Value::String(s) => match sole_placeholder(s) {
            Some(expr) => resolve(expr, vars).unwrap_or(Value::Null),
            None if s.contains(OPEN) => Value::String(render_str(s, vars)),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (render_str(k, vars), render_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Render the url, headers, query and body of a request.
pub fn render_request(request: &RequestDescriptor, vars: &IndexMap<String, Value>) -> RequestDescriptor {
    let mut rendered = request.clone();
    rendered.url = render_str(&request.url, vars);
    rendered.headers = request
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), render_str(v, vars)))
        .collect();
    rendered.query = request
        .query
        .iter()
        .map(|(k, v)| (k.clone(), render_str(v, vars)))
        .collect();
    rendered.body = request.body.as_ref().map(|b| render_value(b, vars));
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> IndexMap<String, Value> {
        let mut vars = IndexMap::new();
        vars.insert("token".to_string(), json!("abc"));
        vars.insert("user".to_string(), json!({"id": 7, "tags": ["a", "b"]}));
        vars.insert("count".to_string(), json!(3));
        vars
    }

    #[test]
    fn test_render_str() {
        let vars = vars();
        assert_eq!(render_str("Bearer {{token}}", &vars), "Bearer abc");
        assert_eq!(render_str("/users/{{ user.id }}/tags/{{user.tags[1]}}", &vars), "/users/7/tags/b");
        assert_eq!(render_str("x{{missing}}y", &vars), "xy");
        assert_eq!(render_str("open {{token", &vars), "open {{token");
    }

    #[test]
    fn test_sole_placeholder_keeps_type() {
        let vars = vars();
        assert_eq!(render_value(&json!("{{count}}"), &vars), json!(3));
        assert_eq!(render_value(&json!("{{user}}"), &vars), json!({"id": 7, "tags": ["a", "b"]}));
        assert_eq!(render_value(&json!("{{missing}}"), &vars), Value::Null);
        assert_eq!(render_value(&json!("n={{count}}"), &vars), json!("n=3"));
    }

    #[test]
    fn test_render_nested_body() {
        let vars = vars();
        let body = json!({"auth": "{{token}}", "ids": ["{{user.id}}", 1], "plain": "x"});
        assert_eq!(
            render_value(&body, &vars),
            json!({"auth": "abc", "ids": [7, 1], "plain": "x"})
        );
    }

    #[test]
    fn test_render_request() {
        let vars = vars();
        let request = RequestDescriptor::post("http://api/users/{{user.id}}", json!({"n": "{{count}}"}))
            .with_header("Authorization", "Bearer {{token}}")
            .with_query("page", "{{count}}");
        let rendered = render_request(&request, &vars);
        assert_eq!(rendered.url, "http://api/users/7");
        assert_eq!(rendered.headers["Authorization"], "Bearer abc");
        assert_eq!(rendered.query["page"], "3");
        assert_eq!(rendered.body, Some(json!({"n": 3})));
    }

    #[test]
    fn test_dotted_variable_name_wins() {
        let mut vars = vars();
        vars.insert("user.id".to_string(), json!("shadow"));
        assert_eq!(resolve("user.id", &vars), Some(json!("shadow")));
    }
}
