//! Error types for the verification engine.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Malformed user input. Always recoverable by re-prompting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no verification id found in {0:?}")]
    MissingVerificationId(String),

    #[error("expected first and last name, got {0:?}")]
    IncompleteName(String),
}

/// Failures from the search, submission, or status endpoints.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} request failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("{service} returned HTTP {status}")]
    Status { service: String, status: u16 },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },
}

/// Disposable mailbox provider failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox creation failed: {0}")]
    CreateFailed(String),

    #[error("Inbox listing failed for {address}: {reason}")]
    ListFailed { address: String, reason: String },

    #[error("Message {id} fetch failed: {reason}")]
    FetchFailed { id: String, reason: String },
}

/// No usable verification link or token in the email body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("no verification link or token found in email")]
    NoToken,
}

/// Browser navigation failures. Timeout is kept distinct.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AutomationError {
    #[error("page did not load within {after:?}")]
    Timeout { after: Duration },

    #[error("navigation failed: {0}")]
    Navigation(String),
}

/// Messaging front-end errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to edit message {handle} on channel {name}: {reason}")]
    EditFailed {
        name: String,
        handle: String,
        reason: String,
    },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
