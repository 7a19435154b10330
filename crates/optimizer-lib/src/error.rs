//! Error taxonomy shared by every optimizer component
//!
//! Each variant maps onto one [`ErrorKind`], which is what crosses process
//! boundaries (RPC responses, status events, persisted failure reasons).

use crate::cdm::Domain;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Abstract error kind carried across component boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    CdmStale,
    CdmEmpty,
    EfficacyViolation,
    ExternalUnavailable,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::CdmStale => "cdm_stale",
            ErrorKind::CdmEmpty => "cdm_empty",
            ErrorKind::EfficacyViolation => "efficacy_violation",
            ErrorKind::ExternalUnavailable => "external_unavailable",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors raised by the decision engine, planner and applier
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Malformed scope, missing parameter, unknown plugin name, bad UUID
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Illegal state transition or uniqueness violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// The cluster data model failed its last refresh
    #[error("cluster data model for {0} is stale")]
    CdmStale(Domain),

    /// The cluster data model holds no nodes
    #[error("cluster data model for {0} is empty")]
    CdmEmpty(Domain),

    /// A solution did not satisfy its goal's efficacy specification
    #[error("efficacy violation: {0}")]
    EfficacyViolation(String),

    /// An external API failed or timed out after retries
    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OptimizerError {
    /// Abstract kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            OptimizerError::InvalidInput(_) => ErrorKind::InvalidInput,
            OptimizerError::NotFound { .. } => ErrorKind::NotFound,
            OptimizerError::Conflict(_) => ErrorKind::Conflict,
            OptimizerError::CdmStale(_) => ErrorKind::CdmStale,
            OptimizerError::CdmEmpty(_) => ErrorKind::CdmEmpty,
            OptimizerError::EfficacyViolation(_) => ErrorKind::EfficacyViolation,
            OptimizerError::ExternalUnavailable(_) => ErrorKind::ExternalUnavailable,
            OptimizerError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        OptimizerError::InvalidInput(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        OptimizerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        OptimizerError::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        OptimizerError::Internal(message.into())
    }

    /// Wrap an adapter error that survived all retries
    pub fn external(err: anyhow::Error) -> Self {
        OptimizerError::ExternalUnavailable(format!("{:#}", err))
    }
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, OptimizerError>;

/// Parse a UUID string, reporting `invalid_input` on failure
pub fn parse_uuid(value: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| OptimizerError::invalid(format!("invalid UUID '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            OptimizerError::invalid("bad").kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            OptimizerError::not_found("audit", "x").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            OptimizerError::CdmStale(Domain::Compute).kind(),
            ErrorKind::CdmStale
        );
        assert_eq!(
            OptimizerError::external(anyhow::anyhow!("boom")).kind(),
            ErrorKind::ExternalUnavailable
        );
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::EfficacyViolation).unwrap();
        assert_eq!(json, "\"efficacy_violation\"");
        assert_eq!(ErrorKind::CdmEmpty.to_string(), "cdm_empty");
    }

    #[test]
    fn test_parse_uuid() {
        assert!(parse_uuid("not-a-uuid").is_err());
        let id = uuid::Uuid::new_v4();
        assert_eq!(parse_uuid(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_error_messages() {
        let err = OptimizerError::CdmEmpty(Domain::Storage);
        assert_eq!(err.to_string(), "cluster data model for storage is empty");
        let err = OptimizerError::not_found("action plan", "abc");
        assert_eq!(err.to_string(), "action plan not found: abc");
    }
}
