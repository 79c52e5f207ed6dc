use crate::store::{CancellationReason, StoreError, StoreKey};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessErrorCode {
    Schema,
    DuplicateKey,
    VersionMismatch,
    ConditionalCheckFailed,
    TransactionConflict,
    Validation,
    Store,
}

impl AccessErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessErrorCode::Schema => "schema",
            AccessErrorCode::DuplicateKey => "duplicate_key",
            AccessErrorCode::VersionMismatch => "version_mismatch",
            AccessErrorCode::ConditionalCheckFailed => "conditional_check_failed",
            AccessErrorCode::TransactionConflict => "transaction_conflict",
            AccessErrorCode::Validation => "validation",
            AccessErrorCode::Store => "store",
        }
    }
}

/// One failed item of a rejected atomic commit.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    /// Position of the logical operation inside its transaction.
    pub operation: usize,
    pub key: StoreKey,
    pub reason: CancellationReason,
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("schema error in entity '{entity}': {message}")]
    Schema { entity: String, message: String },
    #[error("duplicate key in table '{table}': {key}")]
    DuplicateKey {
        table: String,
        key: String,
        failures: Vec<WriteFailure>,
    },
    #[error(
        "version mismatch in table '{table}' for id '{id}': expected {expected}, found {}",
        display_version(.actual)
    )]
    Version {
        table: String,
        id: String,
        expected: u64,
        actual: Option<u64>,
    },
    #[error("conditional check failed in table '{table}': {key}")]
    ConditionalCheck {
        table: String,
        key: String,
        failures: Vec<WriteFailure>,
    },
    #[error("transaction conflict on {} item(s) after retry budget exhausted", .failures.len())]
    TransactionConflict { failures: Vec<WriteFailure> },
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn display_version(actual: &Option<u64>) -> String {
    match actual {
        Some(v) => v.to_string(),
        None => "no stored entity".to_string(),
    }
}

impl AccessError {
    pub fn schema(entity: impl Into<String>, message: impl Into<String>) -> Self {
        AccessError::Schema {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> AccessErrorCode {
        match self {
            AccessError::Schema { .. } => AccessErrorCode::Schema,
            AccessError::DuplicateKey { .. } => AccessErrorCode::DuplicateKey,
            AccessError::Version { .. } => AccessErrorCode::VersionMismatch,
            AccessError::ConditionalCheck { .. } => AccessErrorCode::ConditionalCheckFailed,
            AccessError::TransactionConflict { .. } => AccessErrorCode::TransactionConflict,
            AccessError::Validation(_) => AccessErrorCode::Validation,
            AccessError::Store(StoreError::Validation(_)) => AccessErrorCode::Validation,
            AccessError::Store(_) => AccessErrorCode::Store,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Per-item detail of a rejected commit, empty for non-commit errors.
    pub fn failures(&self) -> &[WriteFailure] {
        match self {
            AccessError::DuplicateKey { failures, .. }
            | AccessError::ConditionalCheck { failures, .. }
            | AccessError::TransactionConflict { failures } => failures,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessError, AccessErrorCode};
    use crate::store::StoreError;

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(AccessErrorCode::DuplicateKey.as_str(), "duplicate_key");
        assert_eq!(AccessErrorCode::VersionMismatch.as_str(), "version_mismatch");
        assert_eq!(
            AccessErrorCode::TransactionConflict.as_str(),
            "transaction_conflict"
        );
    }

    #[test]
    fn store_validation_reports_validation_code() {
        let err = AccessError::from(StoreError::Validation("consistent read on index".into()));
        assert_eq!(err.code(), AccessErrorCode::Validation);
        assert_eq!(err.code_str(), "validation");
    }

    #[test]
    fn version_error_message_names_table_and_versions() {
        let err = AccessError::Version {
            table: "users".into(),
            id: "u1".into(),
            expected: 1,
            actual: Some(2),
        };
        assert_eq!(
            err.to_string(),
            "version mismatch in table 'users' for id 'u1': expected 1, found 2"
        );
        assert!(err.failures().is_empty());
    }
}
