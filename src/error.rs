//! Error taxonomy shared by loaders, reconcilers and the driver.
use std::fmt;
use thiserror::Error;

/// Run-level errors. Everything except `Remote` is detected before the first
/// write is issued.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to load {path}: {message}")]
    Load { path: String, message: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Ambiguity(#[from] AmbiguityError),
    #[error("relation '{relation}' cannot be resolved: database '{db_key}' is missing")]
    RelationResolution { relation: String, db_key: String },
    #[error("remote service error: {0:#}")]
    Remote(#[source] anyhow::Error),
}

impl SyncError {
    pub fn load(path: impl fmt::Display, message: impl fmt::Display) -> Self {
        SyncError::Load {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    /// Process exit code: 1 for bad input, 2 for remote failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Remote(_) => 2,
            _ => 1,
        }
    }
}

/// A raw value does not fit the target property kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("property '{property}': expected {expected}, found {found}")]
pub struct CoercionError {
    pub property: String,
    pub expected: String,
    pub found: String,
}

impl CoercionError {
    pub fn new(
        property: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self {
            property: property.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// More than one observed entity satisfies an identity rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ambiguous match for {rule}: {} candidates ({})", candidates.len(), candidates.join(", "))]
pub struct AmbiguityError {
    pub rule: String,
    pub candidates: Vec<String>,
}

/// Why a single record or page could not be planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("coercion failed: {0}")]
    Coercion(#[from] CoercionError),
    #[error("{0}")]
    Ambiguity(#[from] AmbiguityError),
    #[error("{0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_split_input_and_remote() {
        assert_eq!(SyncError::validation("dup").exit_code(), 1);
        assert_eq!(SyncError::load("a.yaml", "bad").exit_code(), 1);
        let amb = AmbiguityError {
            rule: "title = 'X'".into(),
            candidates: vec!["a".into(), "b".into()],
        };
        assert_eq!(SyncError::from(amb).exit_code(), 1);
        assert_eq!(
            SyncError::Remote(anyhow::anyhow!("boom")).exit_code(),
            2
        );
    }

    #[test]
    fn ambiguity_message_lists_candidates() {
        let amb = AmbiguityError {
            rule: "external_id = 'c-1'".into(),
            candidates: vec!["p1".into(), "p2".into()],
        };
        assert_eq!(
            amb.to_string(),
            "ambiguous match for external_id = 'c-1': 2 candidates (p1, p2)"
        );
    }
}
