//! # collateral-engine
//!
//! Securities-collateral allocation engine for margin calls.
//!
//! Given a margin call's Required Qualifying Value (RQV), a pledger's
//! holdings, the bilateral eligibility ruleset agreed with the pledgee and an
//! FX snapshot, the engine decides which lots (or parts of lots) to move so
//! that the RQV is covered without breaching any per-form concentration
//! limit, then emits the ledger deltas and the settled margin-call record.
//!
//! ## Architecture
//!
//! - **core**: Foundational records: currencies and FX, parties and accounts, holdings, deals, ledger deltas
//! - **policy**: Baseline policy table and bilateral ruleset validation
//! - **allocation**: Normalization, eligibility ceilings, the greedy selector and reconciliation
//! - **service**: Boundaries to the ledger, Deal, Account, ruleset and FX services
//! - **engine**: Orchestration, operation dispatch, configuration and errors
//! - **simulation**: Scenario files and random scenario generation

pub mod allocation;
pub mod core;
pub mod engine;
pub mod policy;
pub mod service;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::allocation::eligibility::EligibilityPlanner;
    pub use crate::allocation::findings::{ExclusionReason, Finding};
    pub use crate::allocation::normalizer::{NormalizedHolding, ValueNormalizer};
    pub use crate::allocation::reconciliation::ReconciliationPlanner;
    pub use crate::allocation::selector::{AllocationPlan, AllocationSelector};
    pub use crate::core::currency::{CurrencyCode, FxRateSnapshot};
    pub use crate::core::deal::{AllocationStatus, Deal, Transaction, TransactionStatus};
    pub use crate::core::ledger::{CommitSet, LedgerDelta};
    pub use crate::core::party::{AccountId, PartyId};
    pub use crate::core::security::{CollateralForm, Holding, SecurityId};
    pub use crate::engine::{
        AllocationEngine, AllocationError, AllocationReport, EngineConfig, StartAllocation,
    };
    pub use crate::policy::baseline::{BaselinePolicyTable, CollateralRule};
    pub use crate::policy::ruleset::{BilateralRuleset, RulesetValidator, ValidatedRuleset};
}
