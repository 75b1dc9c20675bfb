//! Structured user input.

use async_trait::async_trait;

use crate::error::StepError;
use crate::schema::FieldDefinition;
use crate::Values;

/// Result of a value request.
#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome {
    Accepted(Values),
    Cancelled,
}

/// Presents field requests and confirmations to a user.
#[async_trait]
pub trait InputProvider: Send + Sync {
    /// Ask for values of `fields`, pre-filled from `prefill`.
    async fn request_values(
        &self,
        title: &str,
        fields: &[FieldDefinition],
        prefill: &Values,
    ) -> Result<InputOutcome, StepError>;

    /// Ask a yes/no question.
    async fn confirm(&self, title: &str, message: &str) -> Result<bool, StepError>;
}

/// Provider for runs without a user. Every request fails, so only headless
/// resolution can succeed.
#[derive(Debug, Clone, Default)]
pub struct NoInteraction;

#[async_trait]
impl InputProvider for NoInteraction {
    async fn request_values(
        &self,
        title: &str,
        _fields: &[FieldDefinition],
        _prefill: &Values,
    ) -> Result<InputOutcome, StepError> {
        Err(StepError::Input(format!(
            "Interactive input is not available for '{}'",
            title
        )))
    }

    async fn confirm(&self, title: &str, _message: &str) -> Result<bool, StepError> {
        Err(StepError::Input(format!(
            "Interactive confirmation is not available for '{}'",
            title
        )))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Provider that answers with fixed outcomes and records what it was asked.
    pub struct FakeInput {
        pub outcome: InputOutcome,
        pub confirm: bool,
        pub requests: Mutex<Vec<(String, Values)>>,
        pub confirmations: Mutex<Vec<String>>,
    }

    impl FakeInput {
        pub fn accepting(values: Values) -> Self {
            Self {
                outcome: InputOutcome::Accepted(values),
                confirm: true,
                requests: Mutex::new(Vec::new()),
                confirmations: Mutex::new(Vec::new()),
            }
        }

        pub fn cancelling() -> Self {
            Self {
                outcome: InputOutcome::Cancelled,
                ..Self::accepting(Values::new())
            }
        }

        pub fn declining() -> Self {
            Self {
                confirm: false,
                ..Self::accepting(Values::new())
            }
        }
    }

    #[async_trait]
    impl InputProvider for FakeInput {
        async fn request_values(
            &self,
            title: &str,
            _fields: &[FieldDefinition],
            prefill: &Values,
        ) -> Result<InputOutcome, StepError> {
            self.requests
                .lock()
                .unwrap()
                .push((title.to_string(), prefill.clone()));
            Ok(self.outcome.clone())
        }

        async fn confirm(&self, _title: &str, message: &str) -> Result<bool, StepError> {
            self.confirmations.lock().unwrap().push(message.to_string());
            Ok(self.confirm)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_interaction_refuses() {
        let provider = NoInteraction;
        let err = provider
            .request_values("Install", &[], &Values::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Install"));
        assert!(provider.confirm("Install", "Sure?").await.is_err());
    }
}
