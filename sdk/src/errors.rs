//! Error types and handling
//!
//! This module provides the error types shared between the Docent engine and
//! its collaborators. All errors implement the `DocentErrorExt` trait which
//! provides user-friendly hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! Error messages surfaced to end users go through `user_hint`, which never
//! echoes document content, parameters or raw user input.

use thiserror::Error;

/// Trait for Docent error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait DocentErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain:
    /// - Document content or passage text
    /// - Action parameters
    /// - Internal implementation details
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around within a turn.
    /// Non-recoverable errors end the current turn.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Persistence**: Memory backend failures and undecodable entries
/// - **Retrieval**: Knowledge retriever failures
///
/// # Examples
///
/// ```
/// use sdk::errors::{DocentErrorExt, EngineError};
///
/// let error = EngineError::RetrievalTimeout;
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::Config("top_k must be positive".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Persistence errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Memory store unavailable: {0}")]
    MemoryUnavailable(String),

    #[error("Concurrent update on memory entry {0}")]
    MemoryConflict(String),

    // Retrieval errors
    #[error("Knowledge retriever unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Knowledge retriever timed out")]
    RetrievalTimeout,
}

impl DocentErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            // Persistence errors
            Self::Serialization(_) => "Stored data could not be read",
            Self::MemoryUnavailable(_) => {
                "Conversation memory is unavailable. This answer will not be remembered"
            }
            Self::MemoryConflict(_) => "Another request updated this conversation. Try again",

            // Retrieval errors
            Self::RetrievalUnavailable(_) => {
                "The document search service is unavailable. Try again later"
            }
            Self::RetrievalTimeout => "Document search took too long. Try a narrower question",
        }
    }

    fn is_recoverable(&self) -> bool {
        // Configuration has to be fixed by hand; everything else degrades a turn
        !matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_not_recoverable() {
        assert!(!EngineError::Config("bad".to_string()).is_recoverable());
    }

    #[test]
    fn test_degradable_errors_are_recoverable() {
        assert!(EngineError::RetrievalTimeout.is_recoverable());
        assert!(EngineError::MemoryUnavailable("down".to_string()).is_recoverable());
        assert!(EngineError::MemoryConflict("session:a:s1".to_string()).is_recoverable());
    }

    #[test]
    fn test_message_keeps_detail_hint_does_not() {
        let err = EngineError::RetrievalUnavailable("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
        assert!(!err.user_hint().contains("connection refused"));
    }
}
