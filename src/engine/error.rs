use crate::allocation::reconciliation::ReconcileError;
use crate::core::deal::TransactionId;
use crate::service::ServiceError;
use std::fmt;
use thiserror::Error;

/// Which ledger record a lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Deal,
    Transaction,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Deal => write!(f, "deal"),
            RecordKind::Transaction => write!(f, "transaction"),
        }
    }
}

/// The collaborator an upstream read failed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamService {
    Ledger,
    Ruleset,
    FxRates,
    Accounts,
}

impl fmt::Display for UpstreamService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamService::Ledger => write!(f, "ledger"),
            UpstreamService::Ruleset => write!(f, "ruleset service"),
            UpstreamService::FxRates => write!(f, "FX rate service"),
            UpstreamService::Accounts => write!(f, "account service"),
        }
    }
}

/// Everything that can make an allocation operation fail.
///
/// Insufficient collateral is not an error: it is a completed run whose
/// outcome is `Pending`. Dropped rules and excluded holdings are findings on
/// the report.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Wrong argument shape at the boundary. Raised before any ledger read.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: String },

    #[error("{kind} record {id} is malformed: {reason}")]
    MalformedRecord {
        kind: RecordKind,
        id: String,
        reason: String,
    },

    /// The margin call is already settled.
    #[error("transaction {0} is already complete")]
    AlreadyComplete(TransactionId),

    #[error("{service} failed: {source}")]
    Upstream {
        service: UpstreamService,
        #[source]
        source: ServiceError,
    },

    /// Every candidate holding was excluded and at least one of them for a
    /// currency missing from the FX snapshot.
    #[error("no eligible collateral: {unresolved} holding(s) in currencies without an FX rate")]
    NoEligibleCollateral { unresolved: usize },

    #[error("ledger write failed, no changes applied: {0}")]
    LedgerWrite(#[source] ServiceError),

    #[error("deal service refused the status update: {0}")]
    StatusUpdate(#[source] ServiceError),

    #[error("allocation plan does not match holdings: {0}")]
    Reconcile(#[from] ReconcileError),
}

impl AllocationError {
    pub fn upstream(service: UpstreamService, source: ServiceError) -> Self {
        AllocationError::Upstream { service, source }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AllocationError::Upstream { .. } | AllocationError::LedgerWrite(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_is_retryable() {
        let err = AllocationError::upstream(
            UpstreamService::FxRates,
            ServiceError::Unavailable("timeout".into()),
        );
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "FX rate service failed: service unavailable: timeout"
        );
    }

    #[test]
    fn test_input_errors_are_not_retryable() {
        assert!(!AllocationError::InvalidInput("arity".into()).is_retryable());
        let not_found = AllocationError::NotFound {
            kind: RecordKind::Deal,
            id: "D1".into(),
        };
        assert!(!not_found.is_retryable());
        assert_eq!(not_found.to_string(), "deal D1 not found");
    }
}
