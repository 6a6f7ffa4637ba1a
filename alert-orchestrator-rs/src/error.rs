//! Flow-level errors
//!
//! Separates failures that abort a whole flow (bad credentials, missing
//! configuration, unwritable output) from per-item problems that only cause
//! one endpoint, row or file to be skipped.

use alert_sdk::ServiceError;
use agent_tools_rs::ToolError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Upstream failure that survived the retry budget
    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid alert proposal: {0}")]
    InvalidProposal(String),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl FlowError {
    /// Errors that end the flow rather than a single item
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowError::Configuration(_) | FlowError::Authentication(_) | FlowError::Io(_)
        )
    }
}

impl From<ServiceError> for FlowError {
    fn from(error: ServiceError) -> Self {
        let message = error.to_string();
        match error.root() {
            ServiceError::Authentication(_) | ServiceError::Authorization(_) => {
                FlowError::Authentication(message)
            }
            ServiceError::Configuration(_) => FlowError::Configuration(message),
            ServiceError::Parsing(_) | ServiceError::Protocol(_) => {
                FlowError::MalformedResponse(message)
            }
            _ => FlowError::Upstream(message),
        }
    }
}
