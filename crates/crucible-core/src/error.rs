//! Error types for Crucible

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("model error: {0}")]
    ModelError(String),

    #[error("tool error: {name} - {message}")]
    ToolError { name: String, message: String },

    #[error("tool budget exceeded for {tool_name}: used {used}, limit {limit}")]
    ToolBudgetExceeded {
        tool_name: String,
        used: u32,
        remaining: u32,
        limit: u32,
    },

    #[error("store error: {0}")]
    StoreError(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn tool_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolError {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn store_error(message: impl Into<String>) -> Self {
        Self::StoreError(message.into())
    }

    /// Whether this error is the typed budget rejection that the runner
    /// catches at its boundary (every other tool failure stays in-band).
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, Self::ToolBudgetExceeded { .. })
    }
}
