//! Typed step failures.
//!
//! Every failure a step can produce is a `StepError`. The retry policy looks
//! only at its `ErrorKind`, never at the message.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{InvalidStepNumber, StepNumber};

/// Classification that drives the retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No executor registered, invalid step number
    Configuration,

    /// Required inputs missing
    Input,

    /// Collaborator timeout or unexpected failure
    Transient,

    /// Output rejected by `validate`
    Validation,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Validation)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Input => "input",
            Self::Transient => "transient",
            Self::Validation => "validation",
        }
    }
}

/// Failure of a single step invocation
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing required inputs for {step}: {}", .missing.join(", "))]
    Input {
        step: StepNumber,
        missing: Vec<String>,
    },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("step {step} timed out after {}s", .timeout.as_secs())]
    Timeout { step: StepNumber, timeout: Duration },

    #[error("validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Input { .. } => ErrorKind::Input,
            Self::Transient(_) | Self::Timeout { .. } => ErrorKind::Transient,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

impl From<InvalidStepNumber> for StepError {
    fn from(err: InvalidStepNumber) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Storage failures inside an executor are retried like any other transient error
impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transient(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_decision_depends_only_on_kind() {
        assert!(!StepError::configuration("no executor").kind().is_retryable());
        assert!(!StepError::Input {
            step: StepNumber::ProjectSetup,
            missing: vec!["gdd_spec".into()]
        }
        .kind()
        .is_retryable());
        assert!(StepError::transient("connection reset").kind().is_retryable());
        assert!(StepError::Validation { errors: vec!["bad".into()] }
            .kind()
            .is_retryable());

        // A transient error mentioning configuration is still transient
        assert_eq!(
            StepError::transient("configuration service unavailable").kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = StepError::Timeout {
            step: StepNumber::AssetGeneration,
            timeout: Duration::from_secs(900),
        };
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.to_string().contains("900s"));
    }

    #[test]
    fn test_invalid_step_number_is_configuration() {
        let err: StepError = InvalidStepNumber(13).into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
