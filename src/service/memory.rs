use super::{
    write_commit_set, AccountService, AtomicCommit, DealService, Event, EventSink, FxRateSource,
    LedgerStore, RulesetSource, ServiceError,
};
use crate::core::currency::{CurrencyCode, FxRateSnapshot};
use crate::core::deal::{AllocationStatus, Deal, Transaction, TransactionId};
use crate::core::ledger::{BookError, CommitSet, HoldingBook};
use crate::core::party::{AccountId, PartyId};
use crate::core::security::{Holding, SecurityId};
use crate::policy::ruleset::BilateralRuleset;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    records: BTreeMap<String, Vec<u8>>,
    book: HoldingBook,
    /// Account writes left before every further write fails.
    write_budget: Option<usize>,
    reject_status_updates: bool,
    /// Accounts whose holdings cannot be read.
    unreadable: BTreeSet<AccountId>,
}

impl LedgerState {
    fn spend_write(&mut self) -> Result<(), ServiceError> {
        match self.write_budget.as_mut() {
            Some(0) => Err(ServiceError::Unavailable(
                "account service write failed".to_string(),
            )),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-process ledger that plays the key/value store, the Deal service and
/// the Account service at once.
///
/// [`AtomicCommit`] is implemented by applying the commit set to a staged
/// copy and publishing it only when every write succeeded.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock()
    }

    /// Book a deal record under its id.
    pub fn insert_deal(&self, deal: &Deal) -> Result<(), ServiceError> {
        let body = serde_json::to_vec(deal).map_err(|e| ServiceError::Malformed(e.to_string()))?;
        self.put(deal.deal_id.as_str(), &body)
    }

    /// Book a transaction record under its id.
    pub fn insert_transaction(&self, transaction: &Transaction) -> Result<(), ServiceError> {
        let body =
            serde_json::to_vec(transaction).map_err(|e| ServiceError::Malformed(e.to_string()))?;
        self.put(transaction.transaction_id.as_str(), &body)
    }

    /// Seed one lot.
    pub fn insert_holding(&self, holding: Holding) -> Result<(), BookError> {
        self.lock().book.insert(holding)
    }

    /// The transaction record currently stored, if it parses.
    pub fn transaction(&self, id: &TransactionId) -> Option<Transaction> {
        let state = self.lock();
        let body = state.records.get(id.as_str())?;
        serde_json::from_slice(body).ok()
    }

    /// Snapshot of every lot.
    pub fn book(&self) -> HoldingBook {
        self.lock().book.clone()
    }

    /// Let `n` more account writes succeed, then fail every write after.
    pub fn fail_writes_after(&self, n: usize) {
        self.lock().write_budget = Some(n);
    }

    /// Make the Deal service refuse status updates.
    pub fn reject_status_updates(&self) {
        self.lock().reject_status_updates = true;
    }

    /// Make the Account service fail every read of `account_id`.
    pub fn fail_reads_of(&self, account_id: &AccountId) {
        self.lock().unreadable.insert(account_id.clone());
    }
}

impl FromIterator<Holding> for MemoryLedger {
    fn from_iter<T: IntoIterator<Item = Holding>>(iter: T) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                book: iter.into_iter().collect(),
                ..LedgerState::default()
            }),
        }
    }
}

impl LedgerStore for MemoryLedger {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        Ok(self.lock().records.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), ServiceError> {
        self.lock().records.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

impl DealService for MemoryLedger {
    fn update_transaction_allocation_status(
        &self,
        transaction_id: &TransactionId,
        status: &AllocationStatus,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        if state.reject_status_updates {
            return Err(ServiceError::Rejected(format!(
                "status update for {} refused",
                transaction_id
            )));
        }
        let body = state.records.get(transaction_id.as_str()).ok_or_else(|| {
            ServiceError::Rejected(format!("unknown transaction {}", transaction_id))
        })?;
        let mut transaction: Transaction =
            serde_json::from_slice(body).map_err(|e| ServiceError::Malformed(e.to_string()))?;
        transaction.allocation_status = status.clone();
        let body =
            serde_json::to_vec(&transaction).map_err(|e| ServiceError::Malformed(e.to_string()))?;
        state.records.insert(transaction_id.as_str().to_string(), body);
        Ok(())
    }
}

impl AccountService for MemoryLedger {
    fn securities_by_account(&self, account_id: &AccountId) -> Result<Vec<Holding>, ServiceError> {
        let state = self.lock();
        if state.unreadable.contains(account_id) {
            return Err(ServiceError::Unavailable(format!(
                "securitiesByAccount/{}",
                account_id
            )));
        }
        Ok(state.book.holdings_in(account_id))
    }

    fn update_security(&self, holding: &Holding) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.spend_write()?;
        Ok(state.book.update(holding)?)
    }

    fn delete_security(
        &self,
        security_id: &SecurityId,
        account_id: &AccountId,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.spend_write()?;
        Ok(state.book.delete(security_id, account_id)?)
    }

    fn add_security(&self, holding: &Holding) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.spend_write()?;
        Ok(state.book.add(holding)?)
    }
}

impl AtomicCommit for MemoryLedger {
    fn commit(&self, set: &CommitSet) -> Result<(), ServiceError> {
        let mut live = self.lock();
        let staged = MemoryLedger {
            state: Mutex::new(live.clone()),
        };
        write_commit_set(set, &staged, &staged)?;
        *live = staged.state.into_inner();
        Ok(())
    }
}

/// Ruleset service that answers every pair with the same payload.
#[derive(Debug, Clone)]
pub struct StaticRuleset {
    payload: Option<Vec<u8>>,
}

impl StaticRuleset {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(payload.into()),
        }
    }

    pub fn from_ruleset(ruleset: &BilateralRuleset) -> Result<Self, ServiceError> {
        serde_json::to_vec(ruleset)
            .map(Self::new)
            .map_err(|e| ServiceError::Malformed(e.to_string()))
    }

    /// A service that is down.
    pub fn unavailable() -> Self {
        Self { payload: None }
    }
}

impl RulesetSource for StaticRuleset {
    fn fetch_ruleset(
        &self,
        pledger: &PartyId,
        pledgee: &PartyId,
    ) -> Result<BilateralRuleset, ServiceError> {
        let payload = self.payload.as_deref().ok_or_else(|| {
            ServiceError::Unavailable(format!("securityRuleset/{}/{}", pledger, pledgee))
        })?;
        BilateralRuleset::from_json(payload).map_err(|e| ServiceError::Malformed(e.to_string()))
    }
}

/// FX service that always returns the same payload, whatever base is asked.
#[derive(Debug, Clone)]
pub struct StaticFxRates {
    payload: Option<Vec<u8>>,
}

impl StaticFxRates {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(payload.into()),
        }
    }

    pub fn from_snapshot(snapshot: &FxRateSnapshot) -> Result<Self, ServiceError> {
        serde_json::to_vec(snapshot)
            .map(Self::new)
            .map_err(|e| ServiceError::Malformed(e.to_string()))
    }

    pub fn unavailable() -> Self {
        Self { payload: None }
    }
}

impl FxRateSource for StaticFxRates {
    fn latest_rates(&self, base: &CurrencyCode) -> Result<FxRateSnapshot, ServiceError> {
        let payload = self
            .payload
            .as_deref()
            .ok_or_else(|| ServiceError::Unavailable(format!("latest?base={}", base)))?;
        FxRateSnapshot::from_json(payload).map_err(|e| ServiceError::Malformed(e.to_string()))
    }
}

/// Keeps every emitted event for inspection.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::LedgerDelta;
    use rust_decimal_macros::dec;

    fn seeded() -> MemoryLedger {
        [
            Holding::new("S1", "LB", "CommonStocks", 10, dec!(100), "USD"),
            Holding::new("S2", "LB", "CorporateBonds", 10, dec!(100), "USD"),
        ]
        .into_iter()
        .collect()
    }

    fn tx() -> Transaction {
        Transaction::new(
            "TX-1",
            "DEAL-1",
            PartyId::new("P1"),
            PartyId::new("P2"),
            dec!(500),
            CurrencyCode::new("USD"),
        )
    }

    fn commit_set(ledger: &MemoryLedger) -> CommitSet {
        let book = ledger.book();
        let s1 = book.get(&AccountId::new("LB"), &SecurityId::new("S1")).unwrap();
        let s2 = book.get(&AccountId::new("LB"), &SecurityId::new("S2")).unwrap();
        let dest = AccountId::new("DEST");
        CommitSet {
            deltas: vec![
                LedgerDelta::Delete {
                    security_id: s1.security_id.clone(),
                    account_id: s1.account_id.clone(),
                },
                LedgerDelta::Update {
                    holding: s2.with_quantity(5),
                },
                LedgerDelta::Add {
                    holding: s1.moved_to(&dest, 10),
                },
                LedgerDelta::Add {
                    holding: s2.moved_to(&dest, 5),
                },
            ],
            transaction: tx(),
        }
    }

    #[test]
    fn test_commit_applies_everything() {
        let ledger = seeded();
        ledger.insert_transaction(&tx()).unwrap();
        ledger.commit(&commit_set(&ledger)).unwrap();

        let book = ledger.book();
        assert_eq!(book.holdings_in(&AccountId::new("DEST")).len(), 2);
        assert_eq!(book.holdings_in(&AccountId::new("LB")).len(), 1);
        assert_eq!(book.total_quantity(&SecurityId::new("S2")), 10);
    }

    #[test]
    fn test_failed_commit_leaves_state_untouched() {
        let ledger = seeded();
        ledger.insert_transaction(&tx()).unwrap();
        let before = ledger.book();
        ledger.fail_writes_after(2);

        let result = ledger.commit(&commit_set(&ledger));
        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
        assert_eq!(ledger.book(), before);
    }

    #[test]
    fn test_status_update_rewrites_record() {
        let ledger = seeded();
        ledger.insert_transaction(&tx()).unwrap();
        ledger
            .update_transaction_allocation_status(
                &TransactionId::new("TX-1"),
                &AllocationStatus::InProgress,
            )
            .unwrap();
        let stored = ledger.transaction(&TransactionId::new("TX-1")).unwrap();
        assert_eq!(stored.allocation_status, AllocationStatus::InProgress);

        ledger.reject_status_updates();
        assert!(ledger
            .update_transaction_allocation_status(
                &TransactionId::new("TX-1"),
                &AllocationStatus::InProgress
            )
            .is_err());
    }

    #[test]
    fn test_unreadable_account_fails_reads_only() {
        let ledger = seeded();
        ledger.fail_reads_of(&AccountId::new("LB"));
        assert!(matches!(
            ledger.securities_by_account(&AccountId::new("LB")),
            Err(ServiceError::Unavailable(_))
        ));
        assert!(ledger
            .securities_by_account(&AccountId::new("DEST"))
            .unwrap()
            .is_empty());
        assert_eq!(ledger.book().len(), 2);
    }

    #[test]
    fn test_static_sources() {
        let rules = StaticRuleset::new(r#"{"Security": {"Gilt": [20, 7, 90]}}"#);
        let fetched = rules
            .fetch_ruleset(&PartyId::new("P1"), &PartyId::new("P2"))
            .unwrap();
        assert_eq!(fetched.rules().len(), 1);

        let down = StaticRuleset::unavailable();
        assert!(matches!(
            down.fetch_ruleset(&PartyId::new("P1"), &PartyId::new("P2")),
            Err(ServiceError::Unavailable(_))
        ));

        let garbage = StaticFxRates::new("not json");
        assert!(matches!(
            garbage.latest_rates(&CurrencyCode::new("USD")),
            Err(ServiceError::Malformed(_))
        ));
    }
}
