//! Response Validation
//!
//! The scheduler treats validation as an opaque pass/fail call through the
//! [`Validator`] trait. [`BasicValidator`] covers the rules the built-in step
//! types need; richer validator libraries plug in behind the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{self, CmpOp};
use crate::transport::Response;

/// A single validation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationConfig {
    /// Status code must be one of `expected`
    Status { expected: Vec<u16> },
    /// Value at `path` in the body must exist, and satisfy `op value` if given
    Path {
        path: String,
        #[serde(default)]
        op: Option<CmpOp>,
        #[serde(default)]
        value: Option<Value>,
    },
    /// Header must be present, and equal `equals` if given
    Header {
        name: String,
        #[serde(default)]
        equals: Option<String>,
    },
    /// Round trip must not exceed `ms`
    MaxDuration { ms: u64 },
}

/// Outcome of validating one response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn passed() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validates responses against a list of rules
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, response: &Response, configs: &[ValidationConfig]) -> ValidationResult;
}

/// Rule-by-rule validator for [`ValidationConfig`].
///
/// With no rules, a response is valid iff its status is 2xx.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicValidator;

impl BasicValidator {
    fn check(response: &Response, rule: &ValidationConfig) -> Option<String> {
        match rule {
            ValidationConfig::Status { expected } => {
                if expected.contains(&response.status) {
                    None
                } else {
                    Some(format!(
                        "status {} not in expected {:?}",
                        response.status, expected
                    ))
                }
            }
            ValidationConfig::Path { path, op, value } => {
                let Some(actual) = path::extract(&response.body, path) else {
                    return Some(format!("path '{}' not found in body", path));
                };
                match (op, value) {
                    (Some(op), Some(expected)) if !path::compare(&actual, *op, expected) => Some(
                        format!("path '{}': {} {:?} {} failed", path, actual, op, expected),
                    ),
                    (None, Some(expected)) if !path::compare(&actual, CmpOp::Eq, expected) => {
                        Some(format!("path '{}': expected {}, got {}", path, expected, actual))
                    }
                    _ => None,
                }
            }
            ValidationConfig::Header { name, equals } => match (response.header(name), equals) {
                (None, _) => Some(format!("header '{}' missing", name)),
                (Some(actual), Some(expected)) if actual != expected => Some(format!(
                    "header '{}': expected '{}', got '{}'",
                    name, expected, actual
                )),
                _ => None,
            },
            ValidationConfig::MaxDuration { ms } => {
                if response.duration_ms <= *ms {
                    None
                } else {
                    Some(format!(
                        "duration {}ms exceeds {}ms",
                        response.duration_ms, ms
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl Validator for BasicValidator {
    async fn validate(&self, response: &Response, configs: &[ValidationConfig]) -> ValidationResult {
        if configs.is_empty() {
            return if response.is_success() {
                ValidationResult::passed()
            } else {
                ValidationResult::from_errors(vec![format!(
                    "status {} is not a success status",
                    response.status
                )])
            };
        }

        let errors = configs
            .iter()
            .filter_map(|rule| Self::check(response, rule))
            .collect();
        ValidationResult::from_errors(errors)
    }
}
