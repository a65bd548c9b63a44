//! Typed confirmation for destructive operations.

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};

/// The word the invoker typed and the word destroy requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationToken {
    /// What the invoker supplied. `None` when nothing was typed.
    pub supplied: Option<String>,
    /// What the pipeline requires.
    pub expected: String,
}

impl ConfirmationToken {
    /// Creates a token.
    #[must_use]
    pub fn new(supplied: Option<String>, expected: impl Into<String>) -> Self {
        Self {
            supplied,
            expected: expected.into(),
        }
    }

    /// Returns true when the trimmed supplied word equals the expected word
    /// exactly, case included.
    #[must_use]
    pub fn matches(&self) -> bool {
        self.supplied
            .as_deref()
            .is_some_and(|word| word.trim() == self.expected)
    }

    /// Checks the confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfirmationMismatch`] when the words differ
    /// or nothing was supplied.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.matches() {
            Ok(())
        } else {
            tracing::warn!(expected = %self.expected, "Destroy confirmation did not match");
            Err(PipelineError::ConfirmationMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(supplied: &str) -> ConfirmationToken {
        ConfirmationToken::new(Some(supplied.to_string()), "DESTROY")
    }

    #[test]
    fn test_exact_match() {
        assert!(token("DESTROY").validate().is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        assert!(token("  DESTROY\n").matches());
    }

    #[test]
    fn test_case_sensitive() {
        let err = token("destroy").validate().unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ConfirmationMismatch);
    }

    #[test]
    fn test_inner_whitespace_not_trimmed() {
        assert!(!token("DEST ROY").matches());
    }

    #[test]
    fn test_missing_word() {
        let token = ConfirmationToken::new(None, "DESTROY");
        assert!(token.validate().is_err());
    }
}
