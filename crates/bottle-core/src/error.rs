//! Error taxonomy shared by every Bottlemail crate.

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, BottleError>;

#[derive(Debug, thiserror::Error)]
pub enum BottleError {
    /// Empty text, missing recipient, delivery date not in the future.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Message/draft absent, not owned by the caller, or failing the read gate.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Task-queue submission failed (queue full or closed).
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Mail transport failure or timeout.
    #[error("Mail error: {0}")]
    Mail(String),

    /// A job found its row gone or in an unexpected state. Benign, never retried.
    #[error("Inconsistent state: {0}")]
    Inconsistency(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BottleError {
    /// Infrastructure failures that the task runner may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BottleError::Scheduling(_) | BottleError::Mail(_) | BottleError::Database(_)
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        BottleError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        BottleError::NotFound(msg.into())
    }
}

impl From<rusqlite::Error> for BottleError {
    fn from(e: rusqlite::Error) -> Self {
        BottleError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BottleError::Scheduling("queue full".into()).is_transient());
        assert!(BottleError::Mail("timeout".into()).is_transient());
        assert!(!BottleError::validation("empty text").is_transient());
        assert!(!BottleError::not_found("message 1").is_transient());
        assert!(!BottleError::Inconsistency("message 1 vanished".into()).is_transient());
    }

    #[test]
    fn test_display() {
        let err = BottleError::validation("Message cannot be empty");
        assert_eq!(err.to_string(), "Validation error: Message cannot be empty");
    }
}
