//! Path Query Module
//!
//! A small path-query language for pulling values out of structured
//! response bodies, used for step chaining, conditions and validation.
//!
//! Supported syntax:
//! - `$` root (optional: `data.items` equals `$.data.items`)
//! - `.name`, `['name']` property access; `.0` on arrays indexes
//! - `[2]`, `[-1]` array indices, negative counting from the end
//! - `*`, `[*]` wildcard: the array itself, or the ordered values of an object
//! - `..name`, `..*` recursive descent (pre-order)
//! - `[?(@.prop OP literal)]` filters, OP in `== != > < >= <=`
//! - `[start:end:step]` slices
//!
//! Parsing and evaluation are separate passes: [`PathExpr::parse`] builds an
//! AST and [`PathExpr::evaluate`] walks it. The convenience [`extract`]
//! function folds any parse failure into `None`.
//!
//! # Example
//!
//! ```
//! use reqchain::path::extract;
//! use serde_json::json;
//!
//! let body = json!({"items": [{"id": 1}, {"id": 2}]});
//! assert_eq!(extract(&body, "$.items[-1].id"), Some(json!(2)));
//! assert_eq!(extract(&body, "$.items[5].id"), None);
//! ```

pub mod eval;
pub mod lexer;
pub mod parser;

use serde_json::Value;
use thiserror::Error;

pub use eval::compare;
pub use lexer::CmpOp;
pub use parser::{Literal, PathExpr, Predicate, Segment};

/// Errors produced while tokenizing or parsing a path
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at {pos}")]
    UnterminatedString { pos: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: &'static str, found: String },

    #[error("unexpected end of path, expected {0}")]
    UnexpectedEnd(&'static str),
}

/// Evaluate `path` against `data`.
///
/// Malformed paths and missing intermediate properties resolve to `None`;
/// nothing here panics or returns an error.
pub fn extract(data: &Value, path: &str) -> Option<Value> {
    match PathExpr::parse(path) {
        Ok(expr) => expr.evaluate(data),
        Err(e) => {
            tracing::debug!(path, error = %e, "unparseable path");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_returns_input_unchanged() {
        let data = json!({"a": [1, 2, {"b": null}]});
        assert_eq!(extract(&data, "$"), Some(data.clone()));
    }

    #[test]
    fn test_negative_index() {
        let data = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(extract(&data, "$.items[-1].id"), Some(json!(2)));
        assert_eq!(extract(&data, "$.items[-3].id"), None);
    }

    #[test]
    fn test_recursive_descent_multiple_matches() {
        let data = json!({
            "name": "root",
            "children": [
                {"label": "x", "meta": {"name": "leaf"}}
            ]
        });
        assert_eq!(extract(&data, "$..name"), Some(json!(["root", "leaf"])));
    }

    #[test]
    fn test_recursive_descent_single_match() {
        let data = json!({"outer": {"inner": {"token": "abc"}}});
        assert_eq!(extract(&data, "$..token"), Some(json!("abc")));
        assert_eq!(extract(&data, "$..absent"), None);
    }

    #[test]
    fn test_wildcard_on_object_and_array() {
        let data = json!({"obj": {"x": 1, "y": 2}, "arr": [3, 4]});
        assert_eq!(extract(&data, "$.obj.*"), Some(json!([1, 2])));
        assert_eq!(extract(&data, "$.arr[*]"), Some(json!([3, 4])));
        assert_eq!(extract(&data, "$.arr[0][*]"), None);
    }

    #[test]
    fn test_filters() {
        let data = json!({"orders": [
            {"id": 1, "total": 20, "status": "open", "paid": false},
            {"id": 2, "total": 5, "status": "closed", "paid": true},
            {"id": 3, "total": 50, "status": "open", "paid": null}
        ]});
        assert_eq!(
            extract(&data, "$.orders[?(@.total > 10)].id"),
            Some(json!([1, 3]))
        );
        assert_eq!(
            extract(&data, "$.orders[?(@.status == 'closed')].id"),
            Some(json!([2]))
        );
        assert_eq!(
            extract(&data, "$.orders[?(@.status == open)].id"),
            Some(json!([1, 3]))
        );
        assert_eq!(
            extract(&data, "$.orders[?(@.paid == true)].id"),
            Some(json!([2]))
        );
        assert_eq!(
            extract(&data, "$.orders[?(@.paid == null)].id"),
            Some(json!([3]))
        );
        assert_eq!(
            extract(&data, "$.orders[?(@.total <= 5)]"),
            Some(json!([{"id": 2, "total": 5, "status": "closed", "paid": true}]))
        );
        assert_eq!(extract(&data, "$.orders[?(@.total > 100)]"), Some(json!([])));
    }

    #[test]
    fn test_malformed_paths_resolve_to_none() {
        let data = json!({"a": 1});
        assert_eq!(extract(&data, "$.a["), None);
        assert_eq!(extract(&data, "$[?(@.a ~ 1)]"), None);
        assert_eq!(extract(&data, "$..."), None);
        assert_eq!(extract(&data, "$.a.b.c"), None);
    }

    #[test]
    fn test_extract_is_pure() {
        let data = json!({"list": [{"v": 3}, {"v": 1}, {"v": 2}]});
        let before = data.clone();
        let first = extract(&data, "$.list[::-1]");
        let second = extract(&data, "$.list[::-1]");
        assert_eq!(first, second);
        assert_eq!(data, before);
    }
}
