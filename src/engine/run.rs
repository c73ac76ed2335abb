use super::config::EngineConfig;
use super::dispatch::{Operation, Response, StartAllocation};
use super::error::{AllocationError, RecordKind, UpstreamService};
use crate::allocation::eligibility::{Ceilings, CoverageCheck, EligibilityPlanner};
use crate::allocation::findings::Finding;
use crate::allocation::normalizer::ValueNormalizer;
use crate::allocation::reconciliation::{ReconciliationPlanner, SettlementContext};
use crate::allocation::selector::{AllocationPlan, AllocationSelector};
use crate::core::currency::{CurrencyCode, FxRateSnapshot};
use crate::core::deal::{AllocationStatus, Deal, DealId, Transaction, TransactionId};
use crate::core::ledger::CommitSet;
use crate::core::party::AccountId;
use crate::core::security::{CollateralForm, Holding};
use crate::policy::ruleset::{BilateralRuleset, RulesetValidator};
use crate::service::{
    AccountService, AtomicCommit, DealService, Event, EventSink, FxRateSource, LedgerStore,
    RulesetSource, ServiceError,
};
use chrono::{DateTime, NaiveDate, Utc};
use log::{error, info};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::thread::{self, ScopedJoinHandle};
use uuid::Uuid;

/// The collaborators one engine call talks to.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub ledger: &'a dyn LedgerStore,
    pub deals: &'a dyn DealService,
    pub accounts: &'a dyn AccountService,
    pub rulesets: &'a dyn RulesetSource,
    pub fx: &'a dyn FxRateSource,
    pub commit: &'a dyn AtomicCommit,
    pub events: &'a dyn EventSink,
}

/// Every external input of one run, captured before planning starts and
/// never re-read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInputs {
    pub deal: Deal,
    pub transaction: Transaction,
    pub ruleset: BilateralRuleset,
    pub fx: FxRateSnapshot,
    /// Holdings of all four deal accounts.
    pub holdings: BTreeMap<AccountId, Vec<Holding>>,
    pub margin_call_date: DateTime<Utc>,
}

impl RunInputs {
    /// Lots in the accounts collateral is drawn from, in draw order.
    pub fn source_holdings(&self) -> Vec<Holding> {
        self.deal
            .source_accounts()
            .into_iter()
            .filter_map(|account| self.holdings.get(account))
            .flatten()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationOutcome {
    /// RQV covered; securities move.
    Allocated,
    /// Not enough eligible collateral; nothing moves.
    Pending,
}

impl std::fmt::Display for AllocationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationOutcome::Allocated => write!(f, "allocated"),
            AllocationOutcome::Pending => write!(f, "pending (insufficient collateral)"),
        }
    }
}

/// Full account of one allocation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationReport {
    pub run_id: Uuid,
    pub deal_id: DealId,
    pub transaction_id: TransactionId,
    pub outcome: AllocationOutcome,
    pub base_currency: CurrencyCode,
    pub fx_date: NaiveDate,
    /// Rate that converted the RQV from the transaction currency.
    pub conversion_rate: Decimal,
    pub rqv_base: Decimal,
    pub ceilings: Ceilings,
    pub coverage: CoverageCheck,
    pub plan: AllocationPlan,
    pub commit: CommitSet,
    pub findings: Vec<Finding>,
    pub eligible_by_form: BTreeMap<CollateralForm, Decimal>,
    pub eligible_by_account: BTreeMap<AccountId, Decimal>,
}

impl AllocationReport {
    pub fn is_allocated(&self) -> bool {
        self.outcome == AllocationOutcome::Allocated
    }

    /// The status string written to the transaction record.
    pub fn status(&self) -> &AllocationStatus {
        &self.commit.transaction.allocation_status
    }
}

impl std::fmt::Display for AllocationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Allocation Report ===")?;
        writeln!(f, "Run:            {}", self.run_id)?;
        writeln!(f, "Deal:           {}", self.deal_id)?;
        writeln!(f, "Transaction:    {}", self.transaction_id)?;
        writeln!(f, "Outcome:        {}", self.outcome)?;
        writeln!(f, "Status:         {}", self.status())?;
        writeln!(
            f,
            "RQV:            {} {} (rate {}, FX {})",
            self.rqv_base, self.base_currency, self.conversion_rate, self.fx_date
        )?;
        writeln!(f, "Coverable:      {}", self.coverage.coverable)?;

        writeln!(f, "\n--- Ceilings ---")?;
        for (form, ceiling) in &self.ceilings {
            let eligible = self
                .eligible_by_form
                .get(form)
                .copied()
                .unwrap_or(Decimal::ZERO);
            writeln!(
                f,
                "  {:<22} ceiling {:>16}  eligible {:>16}",
                form.as_str(),
                ceiling,
                eligible
            )?;
        }

        writeln!(f, "\n--- Eligible by account ---")?;
        for (account, value) in &self.eligible_by_account {
            writeln!(f, "  {:<22} {:>16}", account.as_str(), value)?;
        }

        writeln!(f)?;
        write!(f, "{}", self.plan)?;

        writeln!(f, "\n--- Ledger deltas ({}) ---", self.commit.deltas.len())?;
        for delta in &self.commit.deltas {
            writeln!(f, "  {:?}", delta)?;
        }

        if !self.findings.is_empty() {
            writeln!(f, "\n--- Findings ({}) ---", self.findings.len())?;
            for finding in &self.findings {
                writeln!(f, "  {}", finding)?;
            }
        }
        Ok(())
    }
}

/// Plan one allocation from captured inputs. Pure and deterministic apart
/// from the report's `run_id`.
///
/// # Pipeline
///
/// 1. Validate the bilateral ruleset against the baseline.
/// 2. Convert the RQV into the ruleset's base currency.
/// 3. Normalize the source-account holdings.
/// 4. Derive ceilings and run the coverage pre-check.
/// 5. Select lots (skipped when the pre-check fails).
/// 6. Reconcile the plan into ledger deltas and the final transaction.
pub fn plan_allocation(
    inputs: &RunInputs,
    config: &EngineConfig,
) -> Result<AllocationReport, AllocationError> {
    let validation = RulesetValidator::validate(
        &inputs.ruleset,
        &config.baseline,
        &config.default_base_currency,
    );
    let ruleset = &validation.ruleset;
    let base = ruleset.base_currency();
    if inputs.fx.base() != base {
        return Err(AllocationError::upstream(
            UpstreamService::FxRates,
            ServiceError::Malformed(format!(
                "expected {} rates, snapshot is based in {}",
                base,
                inputs.fx.base()
            )),
        ));
    }

    let transaction = &inputs.transaction;
    let conversion_rate = inputs
        .fx
        .rate_for(&transaction.currency)
        .map_err(|e| {
            AllocationError::upstream(
                UpstreamService::FxRates,
                ServiceError::Malformed(e.to_string()),
            )
        })?;
    let rqv_base = transaction
        .rqv
        .checked_mul(conversion_rate)
        .ok_or_else(|| AllocationError::MalformedRecord {
            kind: RecordKind::Transaction,
            id: transaction.transaction_id.to_string(),
            reason: format!(
                "RQV {} {} overflows when converted at {}",
                transaction.rqv, transaction.currency, conversion_rate
            ),
        })?;

    let sources = inputs.source_holdings();
    let normalization = ValueNormalizer::normalize(&sources, ruleset, &inputs.fx);
    let unresolved = normalization.unresolved_currency_count();
    if normalization.holdings.is_empty() && unresolved > 0 {
        return Err(AllocationError::NoEligibleCollateral { unresolved });
    }

    let ceilings = EligibilityPlanner::ceilings(rqv_base, ruleset);
    let eligible_by_form = normalization.value_by_form();
    let coverage = EligibilityPlanner::coverage(rqv_base, &ceilings, &eligible_by_form);

    let plan = if coverage.is_feasible() {
        AllocationSelector::select(&normalization.holdings, &ceilings, rqv_base)
    } else {
        info!(
            "transaction {}: coverable {} below RQV {}, skipping selection",
            transaction.transaction_id, coverage.coverable, rqv_base
        );
        AllocationPlan::infeasible(rqv_base, &ceilings)
    };

    let commit = ReconciliationPlanner::reconcile(
        &plan,
        &sources,
        &SettlementContext {
            transaction,
            destination: inputs.deal.destination_account(),
            conversion_rate,
            margin_call_date: Some(inputs.margin_call_date),
        },
    )?;

    let outcome = if plan.is_feasible() {
        AllocationOutcome::Allocated
    } else {
        AllocationOutcome::Pending
    };

    let mut findings = validation.findings;
    findings.extend(normalization.findings.iter().cloned());

    Ok(AllocationReport {
        run_id: Uuid::new_v4(),
        deal_id: inputs.deal.deal_id.clone(),
        transaction_id: transaction.transaction_id.clone(),
        outcome,
        base_currency: base.clone(),
        fx_date: inputs.fx.as_of(),
        conversion_rate,
        rqv_base,
        ceilings,
        coverage,
        plan,
        commit,
        findings,
        eligible_by_form,
        eligible_by_account: normalization.value_by_account(),
    })
}

/// Orchestrates allocation runs against external services.
#[derive(Debug, Clone, Default)]
pub struct AllocationEngine {
    config: EngineConfig,
}

impl AllocationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Route a named operation. Argument errors are raised before any
    /// service is touched.
    pub fn dispatch(
        &self,
        services: &Services<'_>,
        operation: &str,
        args: &[String],
    ) -> Result<Response, AllocationError> {
        match Operation::parse(operation, args)? {
            Operation::StartAllocation(request) => self
                .start_allocation(services, &request)
                .map(|report| Response::Allocation(Box::new(report))),
            Operation::UpdateAllocationStatus {
                transaction_id,
                status,
            } => {
                self.update_allocation_status(services, &transaction_id, &status)?;
                Ok(Response::StatusUpdated {
                    transaction_id,
                    status,
                })
            }
        }
    }

    /// Run one margin-call allocation end to end and signal the outcome on
    /// the event sink.
    pub fn start_allocation(
        &self,
        services: &Services<'_>,
        request: &StartAllocation,
    ) -> Result<AllocationReport, AllocationError> {
        let result = self.run(services, request);
        match &result {
            Ok(report) => services.events.emit(&Event::ok(
                &request.transaction_id,
                report.status().as_str(),
            )),
            Err(e) => {
                error!("transaction {}: {}", request.transaction_id, e);
                services
                    .events
                    .emit(&Event::error(&request.transaction_id, e.to_string()));
            }
        }
        result
    }

    /// Forward a status change to the Deal service.
    pub fn update_allocation_status(
        &self,
        services: &Services<'_>,
        transaction_id: &TransactionId,
        status: &AllocationStatus,
    ) -> Result<(), AllocationError> {
        let _: Transaction = load_record(
            services.ledger,
            RecordKind::Transaction,
            transaction_id.as_str(),
        )?;
        services
            .deals
            .update_transaction_allocation_status(transaction_id, status)
            .map_err(AllocationError::StatusUpdate)?;
        info!("transaction {}: status set to {:?}", transaction_id, status.as_str());
        Ok(())
    }

    fn run(
        &self,
        services: &Services<'_>,
        request: &StartAllocation,
    ) -> Result<AllocationReport, AllocationError> {
        info!(
            "start allocation: deal {}, transaction {}",
            request.deal_id, request.transaction_id
        );
        let deal: Deal = load_record(services.ledger, RecordKind::Deal, request.deal_id.as_str())?;
        let transaction: Transaction = load_record(
            services.ledger,
            RecordKind::Transaction,
            request.transaction_id.as_str(),
        )?;
        if transaction.deal_id != deal.deal_id {
            return Err(AllocationError::InvalidInput(format!(
                "transaction {} belongs to deal {}, not {}",
                transaction.transaction_id, transaction.deal_id, deal.deal_id
            )));
        }
        if transaction.is_complete() {
            return Err(AllocationError::AlreadyComplete(transaction.transaction_id));
        }
        if transaction.rqv < Decimal::ZERO {
            return Err(AllocationError::MalformedRecord {
                kind: RecordKind::Transaction,
                id: transaction.transaction_id.to_string(),
                reason: format!("negative RQV {}", transaction.rqv),
            });
        }

        services
            .deals
            .update_transaction_allocation_status(
                &transaction.transaction_id,
                &AllocationStatus::InProgress,
            )
            .map_err(AllocationError::StatusUpdate)?;

        let inputs = self.gather(services, deal, transaction, request.margin_call_date)?;
        let report = plan_allocation(&inputs, &self.config)?;

        services
            .commit
            .commit(&report.commit)
            .map_err(AllocationError::LedgerWrite)?;

        info!(
            "transaction {}: {} ({} of {} {}, {} deltas, {} findings)",
            report.transaction_id,
            report.outcome,
            report.plan.total_value(),
            report.rqv_base,
            report.base_currency,
            report.commit.deltas.len(),
            report.findings.len()
        );
        Ok(report)
    }

    /// Capture every upstream input. The ruleset is read first because the
    /// FX request needs its base currency; the account reads are
    /// independent of both.
    fn gather(
        &self,
        services: &Services<'_>,
        deal: Deal,
        transaction: Transaction,
        margin_call_date: DateTime<Utc>,
    ) -> Result<RunInputs, AllocationError> {
        let (pricing, lists) = if self.config.concurrent_fetch {
            thread::scope(|s| {
                let pricing = s.spawn(|| self.fetch_pricing(services, &deal));
                let lists: Vec<_> = deal
                    .accounts()
                    .into_iter()
                    .map(|account| (account, s.spawn(move || fetch_holdings(services, account))))
                    .collect();
                let pricing = joined(pricing, UpstreamService::Ruleset);
                let lists: Vec<_> = lists
                    .into_iter()
                    .map(|(account, handle)| {
                        (account.clone(), joined(handle, UpstreamService::Accounts))
                    })
                    .collect();
                (pricing, lists)
            })
        } else {
            let pricing = self.fetch_pricing(services, &deal);
            let lists: Vec<(AccountId, Result<Vec<Holding>, AllocationError>)> = deal
                .accounts()
                .into_iter()
                .map(|account| (account.clone(), fetch_holdings(services, account)))
                .collect();
            (pricing, lists)
        };

        let (ruleset, fx) = pricing?;
        let mut holdings = BTreeMap::new();
        for (account, list) in lists {
            holdings.insert(account, list?);
        }

        Ok(RunInputs {
            deal,
            transaction,
            ruleset,
            fx,
            holdings,
            margin_call_date,
        })
    }

    fn fetch_pricing(
        &self,
        services: &Services<'_>,
        deal: &Deal,
    ) -> Result<(BilateralRuleset, FxRateSnapshot), AllocationError> {
        let ruleset = services
            .rulesets
            .fetch_ruleset(&deal.pledger, &deal.pledgee)
            .map_err(|e| AllocationError::upstream(UpstreamService::Ruleset, e))?;
        let base = ruleset
            .base_currency()
            .cloned()
            .unwrap_or_else(|| self.config.default_base_currency.clone());
        let fx = services
            .fx
            .latest_rates(&base)
            .map_err(|e| AllocationError::upstream(UpstreamService::FxRates, e))?;
        Ok((ruleset, fx))
    }
}

fn fetch_holdings(
    services: &Services<'_>,
    account: &AccountId,
) -> Result<Vec<Holding>, AllocationError> {
    services
        .accounts
        .securities_by_account(account)
        .map_err(|e| AllocationError::upstream(UpstreamService::Accounts, e))
}

fn joined<T>(
    handle: ScopedJoinHandle<'_, Result<T, AllocationError>>,
    service: UpstreamService,
) -> Result<T, AllocationError> {
    handle.join().unwrap_or_else(|_| {
        Err(AllocationError::upstream(
            service,
            ServiceError::Unavailable("fetch thread panicked".to_string()),
        ))
    })
}

fn load_record<T: DeserializeOwned>(
    ledger: &dyn LedgerStore,
    kind: RecordKind,
    id: &str,
) -> Result<T, AllocationError> {
    let body = ledger
        .get(id)
        .map_err(|e| AllocationError::upstream(UpstreamService::Ledger, e))?
        .ok_or_else(|| AllocationError::NotFound {
            kind,
            id: id.to_string(),
        })?;
    serde_json::from_slice(&body).map_err(|e| AllocationError::MalformedRecord {
        kind,
        id: id.to_string(),
        reason: e.to_string(),
    })
}
