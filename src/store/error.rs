use crate::store::Record;
use thiserror::Error;

/// Per-item outcome of a rejected atomic commit.
#[derive(Debug, Clone, PartialEq)]
pub enum CancellationReason {
    /// The item itself was fine; another item caused the rejection.
    None,
    /// `current` is the record occupying the key at evaluation time.
    ConditionalCheckFailed { current: Option<Box<Record>> },
    TransactionConflict,
    ValidationError(String),
    ItemCollectionSizeLimitExceeded,
    ProvisionedThroughputExceeded,
    ThrottlingError,
    Other(String),
}

impl CancellationReason {
    pub fn code(&self) -> &'static str {
        match self {
            CancellationReason::None => "None",
            CancellationReason::ConditionalCheckFailed { .. } => "ConditionalCheckFailed",
            CancellationReason::TransactionConflict => "TransactionConflict",
            CancellationReason::ValidationError(_) => "ValidationError",
            CancellationReason::ItemCollectionSizeLimitExceeded => {
                "ItemCollectionSizeLimitExceeded"
            }
            CancellationReason::ProvisionedThroughputExceeded => "ProvisionedThroughputExceeded",
            CancellationReason::ThrottlingError => "ThrottlingError",
            CancellationReason::Other(_) => "Other",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, CancellationReason::None)
    }

    /// Deterministic reasons that no amount of retrying will fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CancellationReason::ConditionalCheckFailed { .. }
                | CancellationReason::ValidationError(_)
                | CancellationReason::ItemCollectionSizeLimitExceeded
                | CancellationReason::ProvisionedThroughputExceeded
                | CancellationReason::ThrottlingError
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("transaction canceled, reasons [{}]", summarize(.reasons))]
    TransactionCanceled { reasons: Vec<CancellationReason> },
    #[error("store validation error: {0}")]
    Validation(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store error: {0}")]
    Other(String),
}

fn summarize(reasons: &[CancellationReason]) -> String {
    reasons
        .iter()
        .map(CancellationReason::code)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::{CancellationReason, StoreError};

    #[test]
    fn canceled_message_lists_every_reason() {
        let err = StoreError::TransactionCanceled {
            reasons: vec![
                CancellationReason::None,
                CancellationReason::TransactionConflict,
            ],
        };
        assert_eq!(
            err.to_string(),
            "transaction canceled, reasons [None, TransactionConflict]"
        );
    }

    #[test]
    fn conflict_is_the_only_transient_failure() {
        assert!(!CancellationReason::TransactionConflict.is_fatal());
        assert!(CancellationReason::ThrottlingError.is_fatal());
        assert!(
            CancellationReason::ConditionalCheckFailed { current: None }.is_fatal()
        );
        assert!(!CancellationReason::None.is_failure());
    }
}
