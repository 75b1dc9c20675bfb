//! Error types for encoding, step execution and workflow orchestration.

use thiserror::Error;

/// Errors raised synchronously by the parameter encoding layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// A TLV value does not fit into its declared length field.
    #[error("Value too long for {width}-byte length in tag {tag}: {length} bytes (max {max})")]
    TlvOverflow {
        tag: String,
        width: u8,
        length: usize,
        max: usize,
    },

    /// Only 1- and 2-byte length fields are supported.
    #[error("Unsupported length_bytes: {0}")]
    UnsupportedLengthWidth(u8),

    /// A hex string does not describe whole bytes.
    #[error("Odd number of hex digits in {context}: {length}")]
    OddHexLength { context: String, length: usize },

    /// The assembled AID is outside the 5..=16 byte range.
    #[error("Invalid AID length: {0} bytes. AIDs must be 5-16 bytes.")]
    InvalidAidLength(usize),

    /// A custom builder snippet failed.
    #[error("Custom builder failed: {0}")]
    CustomBuilder(String),

    /// The script sandbox rejected a snippet before running it.
    #[error("Sandbox violation: {0}")]
    Sandbox(String),
}

/// Errors raised inside a step. The engine converts them into failed results.
#[derive(Debug, Error)]
pub enum StepError {
    /// Step payload is missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Command or script rejected by an allow-list.
    #[error("{0}")]
    NotAllowed(String),

    /// Process spawn or wait error.
    #[error("Process error: {0}")]
    Process(String),

    /// Execution timed out.
    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    /// Card transport error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Script evaluation error.
    #[error("Script error: {0}")]
    Script(String),

    /// Input provider error.
    #[error("Input error: {0}")]
    Input(String),

    /// A collaborator the step needs is not registered.
    #[error("Service not available: {0}")]
    MissingService(String),

    /// Encoding error.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Workflow-shape problems detected before execution starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Duplicate step ID: {0}")]
    DuplicateStepId(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Circular dependency detected involving steps: {}", .0.join(", "))]
    CircularDependency(Vec<String>),
}

/// Engine-level errors. Any of these terminates the run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("Workflow cancelled by user at step '{step_id}'")]
    Cancelled { step_id: String },

    #[error("Step '{step_id}' validation failed: {message}")]
    StepValidation { step_id: String, message: String },

    #[error("Step '{step_id}' is missing required services: {}", .services.join(", "))]
    MissingServices {
        step_id: String,
        services: Vec<String>,
    },

    #[error("Step '{step_id}' failed: {message}")]
    StepFailed { step_id: String, message: String },

    #[error("Step '{step_id}' has unknown type '{step_type}'")]
    UnknownStepType { step_id: String, step_type: String },

    #[error("Step '{step_id}' has an invalid definition: {message}")]
    InvalidDefinition { step_id: String, message: String },
}

impl WorkflowError {
    /// Id of the step the error originated from, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            WorkflowError::Validation(_) => None,
            WorkflowError::Cancelled { step_id }
            | WorkflowError::StepValidation { step_id, .. }
            | WorkflowError::MissingServices { step_id, .. }
            | WorkflowError::StepFailed { step_id, .. }
            | WorkflowError::UnknownStepType { step_id, .. }
            | WorkflowError::InvalidDefinition { step_id, .. } => Some(step_id),
        }
    }

    /// Returns true if the run stopped because of a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkflowError::Cancelled { .. })
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
