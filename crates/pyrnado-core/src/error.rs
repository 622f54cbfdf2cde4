use rust_decimal::Decimal;
use thiserror::Error;

/// Failure taxonomy shared by every store implementation and surfaced by the
/// gateway as a JSON error body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidInput(String),

    #[error("insufficient funds: requested {requested}, locked {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("{0}")]
    InvalidTransition(String),

    #[error("{0}")]
    MalformedBatch(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn transition(
        entity: &str,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition(format!("{entity} cannot move from {from} to {to}"))
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::Internal(err.to_string())
    }

    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::NotFound(_) => "NotFound",
            Self::InvalidInput(_) => "InvalidInput",
            Self::InsufficientFunds { .. } => "InsufficientFunds",
            Self::InvalidTransition(_) => "InvalidTransition",
            Self::MalformedBatch(_) => "MalformedBatch",
            Self::Conflict(_) => "Conflict",
            Self::Internal(_) => "Internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_message_names_both_states() {
        let err = DomainError::transition("milestone", "pending", "released");
        assert_eq!(err.to_string(), "milestone cannot move from pending to released");
        assert_eq!(err.code(), "InvalidTransition");
    }

    #[test]
    fn insufficient_funds_reports_amounts() {
        let err = DomainError::InsufficientFunds {
            requested: Decimal::new(7000, 0),
            available: Decimal::new(6500, 0),
        };
        assert_eq!(err.to_string(), "insufficient funds: requested 7000, locked 6500");
    }
}
