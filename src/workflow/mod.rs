//! Workflow Module
//!
//! Dependency-aware request chains. A [`Workflow`] declares steps and their
//! dependencies; [`ExecutionPlan`] levels them; a [`ChainContext`] holds the
//! variables, responses and status of one run; [`StepRuntime`] dispatches
//! each step to the handler registered for its type.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use reqchain::executor::{ExecuteOptions, Executor};
//! use reqchain::transport::{HttpTransport, RequestDescriptor};
//! use reqchain::workflow::{Step, Workflow};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = Workflow::define("checkout")
//!         .step(
//!             Step::request("login", RequestDescriptor::post("https://api.example.com/login", json!({})))
//!                 .extract("token", "$.token"),
//!         )
//!         .step(
//!             Step::request(
//!                 "cart",
//!                 RequestDescriptor::get("https://api.example.com/cart")
//!                     .with_header("Authorization", "Bearer {{token}}"),
//!             )
//!             .depends_on(&["login"]),
//!         )
//!         .build();
//!
//!     let executor = Executor::new(Arc::new(HttpTransport::new()?));
//!     let result = executor
//!         .execute_workflow(workflow, ExecuteOptions::workflow())
//!         .await?;
//!     println!("{:?}", result.status);
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod definition;
pub mod handlers;
pub mod registry;
pub mod scheduler;
pub mod template;

pub use context::{ChainContext, ChainError, ChainState, ChainStatus};
pub use definition::{
    Condition, ConditionStep, DelayStep, ExtractionStep, LoopStep, ParallelStep, RequestStep,
    ScriptStep, Step, StepConfig, StepKind, StepPredicate, StepReport, StepStatus, TransformOp,
    TransformationStep, ValidationStep, Workflow, WorkflowBuilder,
};
pub use handlers::{RunSettings, StepCall, StepHandler, StepOutput, StepRuntime};
pub use registry::ContextRegistry;
pub use scheduler::ExecutionPlan;
