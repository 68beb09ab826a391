//! Error types for mail-capture.

use std::time::Duration;

use crate::session::SessionState;

/// Top-level error type for the capture run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid cron schedule: {0}")]
    InvalidSchedule(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credential provider errors.
///
/// Messages carry the secret *identifier*, never the secret values.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Secret {secret_id} unavailable: {reason}")]
    SecretUnavailable { secret_id: String, reason: String },

    #[error("Secret {secret_id} is malformed: {reason}")]
    Malformed { secret_id: String, reason: String },
}

/// Automation capability errors.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Instruction failed: {reason}")]
    Act { reason: String },

    #[error("Capability call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Literal input failed: {reason}")]
    Input { reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Capability session not started")]
    NotStarted,
}

/// Session orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    #[error("Mail section unavailable: {reason}")]
    MailSection { reason: String },

    #[error("Transport failure during {step}: {reason}")]
    Transport { step: &'static str, reason: String },

    #[error("Invalid session state {state:?} for {operation}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },
}

impl SessionError {
    /// Transport failures are recoverable at the schedule boundary; credential
    /// and navigation failures are not (stale credentials must not be retried).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Durable storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Put {key} failed: {reason}")]
    RequestFailed { key: String, reason: String },

    #[error("Put {key} rejected with status {status}")]
    RejectedStatus { key: String, status: u16 },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
