//! Error types for BotClaw.
//!
//! Policy denials are not errors: they travel as `ChainVerdict` values.
//! Everything here is something a caller has to react to.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BotClawError>;

#[derive(Debug, thiserror::Error)]
pub enum BotClawError {
    /// Unknown bot, campaign, decision or job.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid or unreadable BotClaw configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// A bot config or job payload is missing a field the action needs.
    /// Never retried.
    #[error("Fatal config error: {0}")]
    FatalConfig(String),

    /// The action failed but may succeed on a later attempt.
    #[error("Transient execution error: {0}")]
    TransientExecution(String),

    /// Two dispatch attempts raced on the same bot.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// An audit entry was asked to move to a status it cannot reach.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl BotClawError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn database(msg: impl std::fmt::Display) -> Self {
        Self::Database(msg.to_string())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientExecution(msg.into())
    }

    pub fn fatal_config(msg: impl Into<String>) -> Self {
        Self::FatalConfig(msg.into())
    }

    /// Whether the execution queue should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExecution(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BotClawError::transient("timeout").is_retryable());
        assert!(!BotClawError::fatal_config("missing action").is_retryable());
        assert!(!BotClawError::not_found("bot").is_retryable());
        assert!(!BotClawError::ConcurrencyConflict("t1/creator".into()).is_retryable());
    }

    #[test]
    fn test_display_keeps_message() {
        let err = BotClawError::transient("platform returned 503");
        assert_eq!(err.to_string(), "Transient execution error: platform returned 503");
    }
}
