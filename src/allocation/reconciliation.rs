use crate::allocation::selector::AllocationPlan;
use crate::core::deal::{AllocationStatus, Transaction, TransactionStatus};
use crate::core::ledger::{CommitSet, LedgerDelta};
use crate::core::party::AccountId;
use crate::core::security::{Holding, SecurityId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;

/// A plan that does not match the holdings it was computed from.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("plan references {security_id} in {account_id}, which is not held")]
    UnknownLot {
        security_id: SecurityId,
        account_id: AccountId,
    },
    #[error("plan takes {taken} of {security_id} in {account_id}, only {held} held")]
    OverTaken {
        security_id: SecurityId,
        account_id: AccountId,
        taken: u64,
        held: u64,
    },
}

/// Run-level facts the final transaction record carries.
#[derive(Debug, Clone)]
pub struct SettlementContext<'a> {
    pub transaction: &'a Transaction,
    /// Account credited with every taken lot.
    pub destination: &'a AccountId,
    /// Rate that converted the RQV into the base currency.
    pub conversion_rate: Decimal,
    pub margin_call_date: Option<DateTime<Utc>>,
}

/// Turns a selection into ledger deltas and the updated transaction.
pub struct ReconciliationPlanner;

impl ReconciliationPlanner {
    /// Build the commit set for `plan`.
    ///
    /// Source reductions come first, in plan order: a lot left empty is
    /// deleted, anything else is updated to its reduced quantity. Then one
    /// add per plan entry at the destination, never merged across source
    /// accounts. An infeasible plan produces no deltas at all and a
    /// `Pending` transaction.
    pub fn reconcile(
        plan: &AllocationPlan,
        original_holdings: &[Holding],
        ctx: &SettlementContext<'_>,
    ) -> Result<CommitSet, ReconcileError> {
        let mut transaction = ctx.transaction.clone();
        transaction.margin_call_date = ctx.margin_call_date.or(transaction.margin_call_date);

        if !plan.is_feasible() {
            transaction.allocation_status = AllocationStatus::PendingInsufficientCollateral;
            transaction.transaction_status = TransactionStatus::Pending;
            transaction.currency_conversion_rate = None;
            return Ok(CommitSet {
                deltas: Vec::new(),
                transaction,
            });
        }

        let mut originals: BTreeMap<(&AccountId, &SecurityId), &Holding> = BTreeMap::new();
        for h in original_holdings {
            originals.entry((&h.account_id, &h.security_id)).or_insert(h);
        }

        // Total taken per lot, keyed in first-seen order.
        let mut touched: Vec<(&Holding, u64)> = Vec::new();
        let mut adds = Vec::with_capacity(plan.entries().len());
        for entry in plan.entries() {
            let original = originals
                .get(&(&entry.source_account, &entry.security_id))
                .copied()
                .ok_or_else(|| ReconcileError::UnknownLot {
                    security_id: entry.security_id.clone(),
                    account_id: entry.source_account.clone(),
                })?;
            match touched.iter_mut().find(|(h, _)| std::ptr::eq(*h, original)) {
                Some((_, taken)) => *taken += entry.quantity_taken,
                None => touched.push((original, entry.quantity_taken)),
            }
            adds.push(LedgerDelta::Add {
                holding: original.moved_to(ctx.destination, entry.quantity_taken),
            });
        }

        let mut deltas = Vec::with_capacity(touched.len() + adds.len());
        for (original, taken) in touched {
            let remaining = original
                .quantity
                .checked_sub(taken)
                .ok_or_else(|| ReconcileError::OverTaken {
                    security_id: original.security_id.clone(),
                    account_id: original.account_id.clone(),
                    taken,
                    held: original.quantity,
                })?;
            deltas.push(if remaining == 0 {
                LedgerDelta::Delete {
                    security_id: original.security_id.clone(),
                    account_id: original.account_id.clone(),
                }
            } else {
                LedgerDelta::Update {
                    holding: original.with_quantity(remaining),
                }
            });
        }
        deltas.extend(adds);

        transaction.allocation_status = AllocationStatus::Successful;
        transaction.transaction_status = TransactionStatus::Complete;
        transaction.currency_conversion_rate = Some(ctx.conversion_rate);

        Ok(CommitSet {
            deltas,
            transaction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::eligibility::Ceilings;
    use crate::allocation::normalizer::NormalizedHolding;
    use crate::allocation::selector::AllocationSelector;
    use crate::core::currency::CurrencyCode;
    use crate::core::ledger::HoldingBook;
    use crate::core::party::PartyId;
    use crate::core::security::CollateralForm;
    use rust_decimal_macros::dec;

    fn transaction() -> Transaction {
        Transaction::new(
            "TX-1",
            "DEAL-1",
            PartyId::new("P1"),
            PartyId::new("P2"),
            dec!(1_000),
            CurrencyCode::new("USD"),
        )
    }

    fn normalized(h: &Holding) -> NormalizedHolding {
        NormalizedHolding {
            security_id: h.security_id.clone(),
            account_id: h.account_id.clone(),
            collateral_form: h.collateral_form.clone(),
            priority: 1,
            quantity: h.quantity,
            unit_value_base: h.mark_price,
            lot_value_base: h.market_value(),
        }
    }

    fn plan_for(holdings: &[Holding], rqv: Decimal) -> AllocationPlan {
        let normalized: Vec<_> = holdings.iter().map(normalized).collect();
        let ceilings: Ceilings = [(CollateralForm::new("CommonStocks"), dec!(1_000_000))].into();
        AllocationSelector::select(&normalized, &ceilings, rqv)
    }

    #[test]
    fn test_whole_and_partial_lots() {
        let holdings = vec![
            Holding::new("S1", "LB", "CommonStocks", 5, dec!(100), "USD"),
            Holding::new("S2", "SEG", "CommonStocks", 10, dec!(100), "USD"),
        ];
        let plan = plan_for(&holdings, dec!(1_000));
        let tx = transaction();
        let dest = AccountId::new("PLEDGEE-LB");
        let ctx = SettlementContext {
            transaction: &tx,
            destination: &dest,
            conversion_rate: Decimal::ONE,
            margin_call_date: None,
        };
        let set = ReconciliationPlanner::reconcile(&plan, &holdings, &ctx).unwrap();

        assert_eq!(
            set.deltas,
            vec![
                LedgerDelta::Delete {
                    security_id: SecurityId::new("S1"),
                    account_id: AccountId::new("LB"),
                },
                LedgerDelta::Update {
                    holding: holdings[1].with_quantity(5),
                },
                LedgerDelta::Add {
                    holding: holdings[0].moved_to(&dest, 5),
                },
                LedgerDelta::Add {
                    holding: holdings[1].moved_to(&dest, 5),
                },
            ]
        );
        assert_eq!(set.transaction.allocation_status, AllocationStatus::Successful);
        assert_eq!(set.transaction.transaction_status, TransactionStatus::Complete);
        assert_eq!(set.transaction.currency_conversion_rate, Some(Decimal::ONE));
    }

    #[test]
    fn test_deltas_conserve_quantity() {
        let holdings = vec![
            Holding::new("S1", "LB", "CommonStocks", 7, dec!(100), "USD"),
            Holding::new("S1", "SEG", "CommonStocks", 7, dec!(100), "USD"),
        ];
        let plan = plan_for(&holdings, dec!(1_000));
        let tx = transaction();
        let dest = AccountId::new("PLEDGEE-LB");
        let ctx = SettlementContext {
            transaction: &tx,
            destination: &dest,
            conversion_rate: Decimal::ONE,
            margin_call_date: None,
        };
        let set = ReconciliationPlanner::reconcile(&plan, &holdings, &ctx).unwrap();

        let mut book: HoldingBook = holdings.iter().cloned().collect();
        let before = book.quantities_by_security();
        for delta in &set.deltas {
            book.apply(delta).unwrap();
        }
        assert_eq!(book.quantities_by_security(), before);
        assert_eq!(book.get(&dest, &SecurityId::new("S1")).unwrap().quantity, 10);
    }

    #[test]
    fn test_infeasible_plan_is_pending_without_deltas() {
        let holdings = vec![Holding::new("S1", "LB", "CommonStocks", 5, dec!(100), "USD")];
        let plan = plan_for(&holdings, dec!(1_000));
        assert!(!plan.is_feasible());
        let tx = transaction();
        let dest = AccountId::new("PLEDGEE-LB");
        let ctx = SettlementContext {
            transaction: &tx,
            destination: &dest,
            conversion_rate: dec!(1.25),
            margin_call_date: None,
        };
        let set = ReconciliationPlanner::reconcile(&plan, &holdings, &ctx).unwrap();
        assert!(set.moves_nothing());
        assert_eq!(
            set.transaction.allocation_status,
            AllocationStatus::PendingInsufficientCollateral
        );
        assert_eq!(set.transaction.transaction_status, TransactionStatus::Pending);
        assert_eq!(set.transaction.currency_conversion_rate, None);
    }

    #[test]
    fn test_plan_against_missing_lot_fails() {
        let holdings = vec![Holding::new("S1", "LB", "CommonStocks", 20, dec!(100), "USD")];
        let plan = plan_for(&holdings, dec!(1_000));
        let tx = transaction();
        let dest = AccountId::new("PLEDGEE-LB");
        let ctx = SettlementContext {
            transaction: &tx,
            destination: &dest,
            conversion_rate: Decimal::ONE,
            margin_call_date: None,
        };
        let fewer = vec![holdings[0].with_quantity(3)];
        assert!(matches!(
            ReconciliationPlanner::reconcile(&plan, &fewer, &ctx),
            Err(ReconcileError::OverTaken { taken: 10, held: 3, .. })
        ));
        assert!(matches!(
            ReconciliationPlanner::reconcile(&plan, &[], &ctx),
            Err(ReconcileError::UnknownLot { .. })
        ));
    }
}
