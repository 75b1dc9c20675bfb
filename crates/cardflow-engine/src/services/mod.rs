//! External collaborators registered in a workflow context.
//!
//! Steps look these up by name. The engine refuses to run a step whose
//! required services are not registered.

pub mod card;
pub mod input;
pub mod process;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub use card::{select_command, ApduResponse, CardSession, CardTransport};
pub use input::{InputOutcome, InputProvider, NoInteraction};
pub use process::{ProcessOutput, ProcessRunner, TokioProcessRunner};

/// Service name of the card transport.
pub const CARD_TRANSPORT: &str = "card_transport";

/// Service name of the process runner.
pub const PROCESS_RUNNER: &str = "process_runner";

/// Service name of the input provider.
pub const INPUT_PROVIDER: &str = "input_provider";

/// A registered collaborator.
#[derive(Clone)]
pub enum Service {
    Card(Arc<dyn CardTransport>),
    Process(Arc<dyn ProcessRunner>),
    Input(Arc<dyn InputProvider>),
    /// Anything else a third-party step needs.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Service {
    pub fn kind(&self) -> &'static str {
        match self {
            Service::Card(_) => "card",
            Service::Process(_) => "process",
            Service::Input(_) => "input",
            Service::Custom(_) => "custom",
        }
    }

    pub fn as_card(&self) -> Option<Arc<dyn CardTransport>> {
        match self {
            Service::Card(t) => Some(t.clone()),
            _ => None,
        }
    }

    pub fn as_process(&self) -> Option<Arc<dyn ProcessRunner>> {
        match self {
            Service::Process(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_input(&self) -> Option<Arc<dyn InputProvider>> {
        match self {
            Service::Input(i) => Some(i.clone()),
            _ => None,
        }
    }

    /// Downcast a custom service.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Service::Custom(any) => any.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service({})", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_accessors() {
        let service = Service::Process(Arc::new(TokioProcessRunner::new()));
        assert_eq!(service.kind(), "process");
        assert!(service.as_process().is_some());
        assert!(service.as_card().is_none());
        assert!(service.as_input().is_none());
    }

    #[test]
    fn test_custom_downcast() {
        let service = Service::Custom(Arc::new(42u32));
        assert_eq!(service.downcast::<u32>().as_deref(), Some(&42));
        assert!(service.downcast::<String>().is_none());
    }
}
