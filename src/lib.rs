//! reqchain: Request Chaining and Batch Execution
//!
//! An async engine for running groups of HTTP requests and multi-step
//! request workflows.
//!
//! # Key Features
//!
//! - **Execution modes**: sequential, bounded parallel, batched, or
//!   dependency-ordered workflow runs
//! - **Chaining**: values extracted from one response with a small
//!   JSONPath dialect feed `{{variable}}` placeholders in later requests
//! - **Validation**: status, body path, header and latency rules
//! - **Aggregation**: one [`ExecutionResult`] per run with counters,
//!   per-item errors and optional latency metrics
//!
//! # Example: Batch of Requests
//!
//! ```no_run
//! use std::sync::Arc;
//! use reqchain::{ExecuteOptions, Executor, HttpTransport, RequestDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = Executor::new(Arc::new(HttpTransport::new()?));
//!     let requests = (1..=25)
//!         .map(|i| RequestDescriptor::get(format!("https://api.example.com/items/{}", i)))
//!         .collect();
//!
//!     let result = executor
//!         .execute(requests, ExecuteOptions::batch(10).collect_metrics())
//!         .await?;
//!     println!("{}: {}/{} ok", result.id, result.successful, result.total);
//!     Ok(())
//! }
//! ```
//!
//! # Example: Chained Workflow
//!
//! ```no_run
//! use std::sync::Arc;
//! use reqchain::{ExecuteOptions, Executor, HttpTransport, RequestDescriptor, Step, Workflow};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = Workflow::define("login")
//!         .variable("base", json!("https://api.example.com"))
//!         .step(
//!             Step::request("auth", RequestDescriptor::post("{{base}}/login", json!({"user": "demo"})))
//!                 .extract("token", "$.token"),
//!         )
//!         .step(
//!             Step::request(
//!                 "profile",
//!                 RequestDescriptor::get("{{base}}/me")
//!                     .with_header("Authorization", "Bearer {{token}}"),
//!             )
//!             .depends_on(&["auth"]),
//!         )
//!         .build();
//!
//!     let executor = Executor::new(Arc::new(HttpTransport::new()?));
//!     let result = executor.execute_workflow(workflow, ExecuteOptions::workflow()).await?;
//!     println!("status: {:?}", result.status);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod observe;
pub mod path;
pub mod spec;
pub mod transport;
pub mod validate;
pub mod workflow;

pub use config::{load_config, ExecutorConfig};
pub use error::{Error, FailureKind, ItemFailure, Result};
pub use executor::{
    ExecuteOptions, ExecutionMode, ExecutionRegistry, ExecutionResult, ExecutionStatus, Executor,
    ExecutorBuilder,
};
pub use observe::{LifecycleEvent, Reporter, ResultAggregator};
pub use path::extract;
pub use spec::{load_workflow, parse_workflow, WorkflowSpec};
pub use transport::{HttpTransport, RequestDescriptor, Response, Transport};
pub use validate::{BasicValidator, ValidationConfig, ValidationResult, Validator};
pub use workflow::{ChainContext, ChainState, ChainStatus, Condition, Step, Workflow};
