//! Cardflow Engine
//!
//! Declarative smart-card provisioning workflows.
//!
//! This crate provides:
//! - Parameter encoding: templates, TLV structures and AID assembly
//! - A workflow context with variables, step results, scratch space and a
//!   persistent card session
//! - Built-in steps: script, command, apdu, dialog, confirmation
//! - A sandbox for third-party scripts and custom parameter builders
//! - A sequential engine ordering steps by their dependencies

pub mod config;
pub mod context;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod registry;
pub mod result;
pub mod sandbox;
pub mod schema;
pub mod services;
pub mod steps;

use std::collections::HashMap;

/// Workflow variables keyed by name.
pub type Values = HashMap<String, serde_json::Value>;

pub use config::EngineConfig;
pub use context::{CancelHandle, ProgressCallback, WorkflowContext};
pub use encoding::{AidBuilder, EncodedParameters, ParameterEncoder, TemplateProcessor, TlvBuilder};
pub use engine::{ExecutionReport, WorkflowBuilder, WorkflowEngine};
pub use error::{EncodingError, StepError, ValidationError, WorkflowError};
pub use registry::{StepFactory, StepRegistry};
pub use result::{StepResult, StepStatus};
pub use schema::{ParameterDefinition, StepDefinition, WorkflowDefinition};
pub use steps::{Step, StepMeta};
