//! Boundaries to the collaborators an allocation run talks to.
//!
//! The engine only depends on these traits. Implementations must be
//! `Send + Sync` so the upstream reads can be issued from scoped threads.
//! [`memory`] holds in-process implementations for tests, demos and the CLI.

pub mod memory;

use crate::core::currency::{CurrencyCode, FxRateSnapshot};
use crate::core::deal::{AllocationStatus, TransactionId};
use crate::core::ledger::{BookError, CommitSet, LedgerDelta};
use crate::core::party::{AccountId, PartyId};
use crate::core::security::{Holding, SecurityId};
use crate::policy::ruleset::BilateralRuleset;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Transport failure or the service is down.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// The service answered and refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Book(#[from] BookError),
}

/// Ledger key/value store. Keys are deal and transaction ids; values are
/// the JSON-serialized records.
pub trait LedgerStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ServiceError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), ServiceError>;
}

/// Cross-contract calls to the Deal service.
pub trait DealService: Send + Sync {
    fn update_transaction_allocation_status(
        &self,
        transaction_id: &TransactionId,
        status: &AllocationStatus,
    ) -> Result<(), ServiceError>;
}

/// Cross-contract calls to the Account service.
pub trait AccountService: Send + Sync {
    fn securities_by_account(&self, account_id: &AccountId) -> Result<Vec<Holding>, ServiceError>;

    fn update_security(&self, holding: &Holding) -> Result<(), ServiceError>;

    fn delete_security(
        &self,
        security_id: &SecurityId,
        account_id: &AccountId,
    ) -> Result<(), ServiceError>;

    fn add_security(&self, holding: &Holding) -> Result<(), ServiceError>;
}

/// Source of the bilateral ruleset for a pledger/pledgee pair.
pub trait RulesetSource: Send + Sync {
    fn fetch_ruleset(
        &self,
        pledger: &PartyId,
        pledgee: &PartyId,
    ) -> Result<BilateralRuleset, ServiceError>;
}

/// Source of the latest FX rates for a base currency.
pub trait FxRateSource: Send + Sync {
    fn latest_rates(&self, base: &CurrencyCode) -> Result<FxRateSnapshot, ServiceError>;
}

/// Applies a whole commit set or nothing.
pub trait AtomicCommit: Send + Sync {
    fn commit(&self, set: &CommitSet) -> Result<(), ServiceError>;
}

/// Fire-and-forget outcome notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub name: String,
    pub transaction_id: TransactionId,
    pub message: String,
    pub code: u16,
}

impl Event {
    pub const OK: u16 = 200;
    pub const ERROR: u16 = 503;

    pub fn ok(transaction_id: &TransactionId, message: impl Into<String>) -> Self {
        Self {
            name: "allocation".to_string(),
            transaction_id: transaction_id.clone(),
            message: message.into(),
            code: Self::OK,
        }
    }

    pub fn error(transaction_id: &TransactionId, message: impl Into<String>) -> Self {
        Self {
            name: "allocation".to_string(),
            transaction_id: transaction_id.clone(),
            message: message.into(),
            code: Self::ERROR,
        }
    }
}

/// Event/notification side channel. Emission never fails the run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Writes each event's JSON body to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(body) => info!("event {}", body),
            Err(e) => info!("event {} ({})", event.message, e),
        }
    }
}

/// Replay a commit set through the Account service and ledger, one call at
/// a time. Stops at the first failure; atomicity is the caller's concern.
pub fn write_commit_set(
    set: &CommitSet,
    accounts: &dyn AccountService,
    ledger: &dyn LedgerStore,
) -> Result<(), ServiceError> {
    for delta in &set.deltas {
        match delta {
            LedgerDelta::Update { holding } => accounts.update_security(holding)?,
            LedgerDelta::Delete {
                security_id,
                account_id,
            } => accounts.delete_security(security_id, account_id)?,
            LedgerDelta::Add { holding } => accounts.add_security(holding)?,
        }
    }
    let body = serde_json::to_vec(&set.transaction)
        .map_err(|e| ServiceError::Malformed(e.to_string()))?;
    ledger.put(set.transaction.transaction_id.as_str(), &body)
}
