//! Declarative workflow files.
//!
//! ```yaml
//! api_version: v1
//! id: signup
//! variables:
//!   base: https://api.example.com
//! steps:
//!   - id: create
//!     type: request
//!     request:
//!       method: POST
//!       url: "{{base}}/users"
//!       body: { email: "a@example.com" }
//!     extract:
//!       user_id: $.id
//!   - id: fetch
//!     type: request
//!     depends_on: [create]
//!     request:
//!       url: "{{base}}/users/{{user_id}}"
//! ```

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::read_document;
use crate::executor::ExecuteOptions;
use crate::workflow::{Step, Workflow};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Run options to use when the caller supplies none
    #[serde(default)]
    pub options: Option<ExecuteOptions>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl WorkflowSpec {
    /// Build the runtime [`Workflow`]
    pub fn into_workflow(self) -> Workflow {
        let mut builder = Workflow::define(self.id.clone()).name(self.name.unwrap_or(self.id));
        for (name, value) in self.variables {
            builder = builder.variable(name, value);
        }
        for step in self.steps {
            builder = builder.step(step);
        }
        builder.build()
    }
}

/// Parse a spec from a string; `yaml` selects the format
pub fn parse_workflow(raw: &str, yaml: bool) -> Result<WorkflowSpec> {
    let spec: WorkflowSpec = if yaml {
        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("invalid YAML workflow: {}", e)))?
    } else {
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid JSON workflow: {}", e)))?
    };
    validate_spec(&spec)?;
    Ok(spec)
}

/// Load and validate a workflow file (`.yaml`/`.yml` or JSON)
pub fn load_workflow(path: &Path) -> Result<WorkflowSpec> {
    let spec: WorkflowSpec = read_document(path, "workflow")?;
    validate_spec(&spec)?;
    tracing::debug!(path = %path.display(), workflow = %spec.id, steps = spec.steps.len(), "loaded workflow");
    Ok(spec)
}

pub fn validate_spec(spec: &WorkflowSpec) -> Result<()> {
    if spec.api_version != "v1" {
        return Err(Error::Config(format!(
            "unsupported api_version '{}', expected 'v1'",
            spec.api_version
        )));
    }
    if spec.steps.is_empty() {
        return Err(Error::Config(format!("workflow '{}' has no steps", spec.id)));
    }
    if let Some(options) = &spec.options {
        options.validate()?;
    }
    spec.clone().into_workflow().validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Condition, StepConfig, StepKind};
    use std::io::Write;

    const YAML: &str = r#"
api_version: v1
id: signup
name: Sign up
variables:
  base: http://api
steps:
  - id: create
    type: request
    request:
      method: POST
      url: "{{base}}/users"
      body: { email: "a@example.com" }
    extract:
      user_id: $.id
    retry: 2
  - id: wait
    type: delay
    duration_ms: 50ms
    depends_on: [create]
  - id: fetch
    type: request
    depends_on: [wait]
    condition: { when: exists, variable: user_id }
    request:
      url: "{{base}}/users/{{user_id}}"
      validations:
        - type: status
          expected: [200]
"#;

    #[test]
    fn test_parse_yaml_workflow() {
        let spec = parse_workflow(YAML, true).unwrap();
        assert_eq!(spec.steps.len(), 3);
        let workflow = spec.into_workflow();
        assert_eq!(workflow.name, "Sign up");
        assert_eq!(workflow.variables["base"], "http://api");

        let create = workflow.step("create").unwrap();
        assert_eq!(create.retry, 2);
        assert_eq!(create.kind(), StepKind::Request);

        match &workflow.step("wait").unwrap().config {
            StepConfig::Delay(d) => assert_eq!(d.duration_ms, 50),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_api_version() {
        let raw = r#"{"api_version": "v2", "id": "x", "steps": [{"id": "a", "type": "delay", "duration_ms": 1}]}"#;
        assert!(matches!(parse_workflow(raw, false), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_duplicate_steps() {
        let raw = r#"{"id": "x", "steps": [
            {"id": "a", "type": "delay", "duration_ms": 1},
            {"id": "a", "type": "delay", "duration_ms": 1}
        ]}"#;
        assert!(parse_workflow(raw, false).is_err());
    }

    #[test]
    fn test_rejects_unknown_step_type() {
        let raw = r#"{"id": "x", "steps": [{"id": "a", "type": "teleport"}]}"#;
        assert!(matches!(parse_workflow(raw, false), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let spec = load_workflow(file.path()).unwrap();
        assert_eq!(spec.id, "signup");
    }

    #[test]
    fn test_condition_parses() {
        let raw = r#"{"id": "x", "steps": [{
            "id": "a", "type": "delay", "duration_ms": 1,
            "condition": {"when": "all", "conditions": [
                {"when": "flag", "name": "ready"},
                {"when": "not", "condition": {"when": "exists", "variable": "done"}}
            ]}
        }]}"#;
        let spec = parse_workflow(raw, false).unwrap();
        assert!(matches!(spec.steps[0].condition, Some(Condition::All { .. })));
    }
}
