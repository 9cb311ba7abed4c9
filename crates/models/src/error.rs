use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorShape {
    pub error_message: String,
    pub error_type: String,
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid request: {reason}")]
    Validation { reason: String },

    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    #[error("{resource} not found: {name}")]
    NotFound { resource: &'static str, name: String },

    #[error("Runtime error: {message}")]
    Runtime { message: String },

    #[error("Store error: {reason}")]
    Store { reason: String },

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Permission denied")]
    Forbidden,

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Internal server error: {reason}")]
    Internal { reason: String },
}

impl OrchestratorError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    pub fn container_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Container",
            name: name.into(),
        }
    }

    pub fn record_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Container record",
            name: name.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn to_error_shape(&self) -> ErrorShape {
        ErrorShape {
            error_message: self.to_string(),
            error_type: self.error_type().to_string(),
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            OrchestratorError::Validation { .. } => "ValidationError",
            OrchestratorError::Conflict { .. } => "ConflictError",
            OrchestratorError::NotFound { .. } => "NotFoundError",
            OrchestratorError::Runtime { .. } => "RuntimeError",
            OrchestratorError::Store { .. } => "StoreError",
            OrchestratorError::SqlxError(_) => "StoreError",
            OrchestratorError::Unauthorized { .. } => "AuthError",
            OrchestratorError::Forbidden => "AuthError",
            OrchestratorError::Config { .. } => "ConfigError",
            OrchestratorError::Internal { .. } => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            OrchestratorError::Validation { .. } => 400,
            OrchestratorError::Unauthorized { .. } => 401,
            OrchestratorError::Forbidden => 403,
            OrchestratorError::NotFound { .. } => 404,
            OrchestratorError::Conflict { .. } => 409,
            OrchestratorError::Runtime { .. } => 502,
            OrchestratorError::Store { .. } => 500,
            OrchestratorError::SqlxError(_) => 500,
            OrchestratorError::Config { .. } => 500,
            OrchestratorError::Internal { .. } => 500,
        }
    }
}
