//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Failures that follow from the request itself: bad input, unknown ids,
/// taken names, missing credentials. Storage and queue failures have their
/// own error types in `clientdesk-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input rejected by a validation rule (empty name, negative amount).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Missing or soft-deleted resource.
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller is unknown or its token no longer maps to a user.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Stable machine-readable code, used as `error` in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InvalidId(_) => "invalid_id",
            Self::NotFound => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized => "unauthorized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DomainError::validation("x").code(), "validation_error");
        assert_eq!(DomainError::invalid_id("x").code(), "invalid_id");
        assert_eq!(DomainError::NotFound.code(), "not_found");
        assert_eq!(DomainError::Unauthorized.code(), "unauthorized");
    }

    #[test]
    fn messages_carry_the_detail() {
        let err = DomainError::validation("salary must be >= 0");
        assert_eq!(err.to_string(), "validation failed: salary must be >= 0");
    }
}
