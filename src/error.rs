use std::time::Duration;
use thiserror::Error;

use crate::provision::StackHandle;

/// Main error type for fixture, polling and backend operations
#[derive(Debug, Error)]
pub enum PotemkinError {
    #[error("Provisioning of {stack} failed: {message}")]
    Provisioning {
        stack: String,
        message: String,
        /// Whatever the backend managed to create before failing.
        partial: Option<Box<StackHandle>>,
    },

    #[error("Condition not met after {attempts} attempts in {elapsed:?}; last state: {last_state}")]
    PollTimeout {
        attempts: u32,
        elapsed: Duration,
        last_state: String,
    },

    #[error("Compliance backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Rule {0} does not support on-demand evaluation")]
    UnsupportedTrigger(String),

    #[error("Compliance backend error: {0}")]
    Backend(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stack output not found: {0}")]
    MissingOutput(String),

    #[error("Test failed: {error:#}")]
    TestFailed {
        error: anyhow::Error,
        /// Secondary failure raised while tearing down after the test.
        teardown: Option<Box<PotemkinError>>,
    },

    #[error("Teardown of {stack} failed: {error}")]
    Teardown {
        stack: String,
        #[source]
        error: Box<PotemkinError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PotemkinError {
    pub fn provisioning(stack: &str, message: impl Into<String>) -> Self {
        Self::Provisioning {
            stack: stack.to_string(),
            message: message.into(),
            partial: None,
        }
    }

    /// Attach the handle of resources that exist despite the failure
    pub fn with_partial(self, handle: StackHandle) -> Self {
        match self {
            Self::Provisioning { stack, message, .. } => Self::Provisioning {
                stack,
                message,
                partial: Some(Box::new(handle)),
            },
            other => other,
        }
    }

    /// Errors the poll loop retries on its next scheduled attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

pub type Result<T, E = PotemkinError> = std::result::Result<T, E>;
