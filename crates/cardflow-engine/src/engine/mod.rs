//! Workflow construction and execution.

pub mod builder;
pub mod executor;
pub mod order;

pub use builder::WorkflowBuilder;
pub use executor::{ExecutionReport, StepRecord, WorkflowEngine};
