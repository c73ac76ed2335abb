use crate::allocation::eligibility::Ceilings;
use crate::allocation::normalizer::NormalizedHolding;
use crate::core::party::AccountId;
use crate::core::security::{quantity_str, CollateralForm, SecurityId};
use log::debug;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One lot, or part of a lot, chosen to cover the RQV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub security_id: SecurityId,
    pub source_account: AccountId,
    pub collateral_form: CollateralForm,
    pub priority: u32,
    #[serde(with = "quantity_str")]
    pub quantity_taken: u64,
    pub unit_value_base: Decimal,
    pub value_taken: Decimal,
    /// True when the entire lot was taken.
    pub whole_lot: bool,
}

/// Ordered output of the selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPlan {
    entries: Vec<PlanEntry>,
    rqv: Decimal,
    /// Unmet RQV. Zero or negative once covered; a negative value is the
    /// overshoot from indivisible units.
    remaining_rqv: Decimal,
    /// Per-form headroom left after selection.
    remaining_ceilings: Ceilings,
    feasible: bool,
}

impl AllocationPlan {
    /// A plan that takes nothing, used when the pre-check already failed.
    pub fn infeasible(rqv: Decimal, ceilings: &Ceilings) -> Self {
        Self {
            entries: Vec::new(),
            rqv,
            remaining_rqv: rqv,
            remaining_ceilings: ceilings.clone(),
            feasible: false,
        }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn rqv(&self) -> Decimal {
        self.rqv
    }

    pub fn remaining_rqv(&self) -> Decimal {
        self.remaining_rqv
    }

    /// Unmet RQV clamped at zero, as reported to callers.
    pub fn shortfall(&self) -> Decimal {
        self.remaining_rqv.max(Decimal::ZERO)
    }

    pub fn remaining_ceilings(&self) -> &Ceilings {
        &self.remaining_ceilings
    }

    pub fn is_feasible(&self) -> bool {
        self.feasible
    }

    pub fn total_value(&self) -> Decimal {
        self.entries.iter().map(|e| e.value_taken).sum()
    }

    pub fn value_by_form(&self) -> BTreeMap<CollateralForm, Decimal> {
        let mut totals = BTreeMap::new();
        for e in &self.entries {
            *totals
                .entry(e.collateral_form.clone())
                .or_insert(Decimal::ZERO) += e.value_taken;
        }
        totals
    }
}

/// The greedy, priority-ordered, ceiling-constrained waterfall.
pub struct AllocationSelector;

impl AllocationSelector {
    /// Select lots to cover `rqv`.
    ///
    /// # Algorithm
    ///
    /// 1. Order holdings by `(priority, security id, account id)`.
    /// 2. Work on a private copy of `ceilings`; the caller's map is untouched.
    /// 3. For each holding while RQV remains: skip it if its form has no
    ///    headroom left, otherwise take `min(lot, headroom, remaining RQV)`.
    ///    A lot that fits whole is taken whole; otherwise the smallest
    ///    number of whole units covering that value is taken, which may
    ///    overshoot by less than one unit.
    /// 4. Charge the value taken against both the RQV and the form ceiling.
    ///
    /// Single pass, no backtracking. A skipped holding is never revisited.
    pub fn select(holdings: &[NormalizedHolding], ceilings: &Ceilings, rqv: Decimal) -> AllocationPlan {
        let mut ordered: Vec<&NormalizedHolding> = holdings.iter().collect();
        ordered.sort_by(|a, b| {
            (a.priority, &a.security_id, &a.account_id).cmp(&(
                b.priority,
                &b.security_id,
                &b.account_id,
            ))
        });

        let mut remaining_rqv = rqv;
        let mut remaining_ceilings = ceilings.clone();
        let mut entries = Vec::new();

        for h in ordered {
            if remaining_rqv <= Decimal::ZERO {
                break;
            }
            let Some(headroom) = remaining_ceilings.get_mut(&h.collateral_form) else {
                continue;
            };
            if *headroom <= Decimal::ZERO || h.lot_value_base <= Decimal::ZERO {
                debug!(
                    "skip {} in {}: no headroom for {}",
                    h.security_id, h.account_id, h.collateral_form
                );
                continue;
            }

            let usable = h.lot_value_base.min(*headroom).min(remaining_rqv);
            let (quantity_taken, value_taken, whole_lot) = if usable == h.lot_value_base {
                (h.quantity, h.lot_value_base, true)
            } else {
                let units = (usable / h.unit_value_base)
                    .ceil()
                    .to_u64()
                    .unwrap_or(h.quantity)
                    .min(h.quantity);
                let value = h.unit_value_base * Decimal::from(units);
                (units, value, units == h.quantity)
            };

            *headroom -= value_taken;
            remaining_rqv -= value_taken;
            debug!(
                "take {} x {} from {} ({}): {}, remaining {}",
                quantity_taken, h.security_id, h.account_id, h.collateral_form, value_taken, remaining_rqv
            );

            entries.push(PlanEntry {
                security_id: h.security_id.clone(),
                source_account: h.account_id.clone(),
                collateral_form: h.collateral_form.clone(),
                priority: h.priority,
                quantity_taken,
                unit_value_base: h.unit_value_base,
                value_taken,
                whole_lot,
            });
        }

        AllocationPlan {
            entries,
            rqv,
            remaining_rqv,
            remaining_ceilings,
            feasible: remaining_rqv <= Decimal::ZERO,
        }
    }
}

impl std::fmt::Display for AllocationPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Allocation Plan ===")?;
        writeln!(f, "RQV:            {}", self.rqv)?;
        writeln!(f, "Allocated:      {}", self.total_value())?;
        writeln!(f, "Shortfall:      {}", self.shortfall())?;
        writeln!(f, "Feasible:       {}", self.feasible)?;
        for e in &self.entries {
            writeln!(
                f,
                "  {:<14} {:<16} {:<20} {:>10} {:>16}{}",
                e.security_id.as_str(),
                e.source_account.as_str(),
                e.collateral_form.as_str(),
                e.quantity_taken,
                e.value_taken,
                if e.whole_lot { "" } else { " (partial)" }
            )?;
        }
        Ok(())
    }
}
