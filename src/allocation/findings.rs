//! Audit trail for an allocation run.
//!
//! Nothing is silently dropped: every ruleset entry the validator discards
//! and every holding the normalizer excludes is recorded here and travels
//! with the final report.

use crate::core::currency::CurrencyCode;
use crate::core::party::AccountId;
use crate::core::security::{CollateralForm, SecurityId};
use crate::policy::baseline::CollateralRule;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a holding did not take part in the allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// The collateral form is absent from the validated ruleset.
    FormNotEligible { form: CollateralForm },
    /// The ruleset restricts currencies and this one is not listed.
    CurrencyNotEligible { currency: CurrencyCode },
    /// The FX snapshot has no rate for the holding's currency.
    UnresolvedCurrency { currency: CurrencyCode },
    ZeroQuantity,
    NonPositivePrice { price: Decimal },
    /// A second lot with the same security in the same account.
    DuplicateLot,
    /// The lot value does not fit the fixed-point range.
    ValueOverflow,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::FormNotEligible { form } => {
                write!(f, "collateral form {} is not eligible", form)
            }
            ExclusionReason::CurrencyNotEligible { currency } => {
                write!(f, "currency {} is not eligible", currency)
            }
            ExclusionReason::UnresolvedCurrency { currency } => {
                write!(f, "no FX rate for {}", currency)
            }
            ExclusionReason::ZeroQuantity => write!(f, "zero quantity"),
            ExclusionReason::NonPositivePrice { price } => {
                write!(f, "non-positive mark price {}", price)
            }
            ExclusionReason::DuplicateLot => write!(f, "duplicate lot"),
            ExclusionReason::ValueOverflow => write!(f, "lot value overflow"),
        }
    }
}

/// A warning-level condition recorded during a run. Findings never abort
/// the run on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// A bilateral rule looser than baseline on every axis was dropped.
    RulesetNonCompliant {
        form: CollateralForm,
        bilateral: CollateralRule,
        baseline: CollateralRule,
    },
    /// A bilateral rule for a form the baseline does not know was dropped.
    FormNotInBaseline { form: CollateralForm },
    HoldingExcluded {
        security_id: SecurityId,
        account_id: AccountId,
        reason: ExclusionReason,
    },
}

impl Finding {
    pub fn is_unresolved_currency(&self) -> bool {
        matches!(
            self,
            Finding::HoldingExcluded {
                reason: ExclusionReason::UnresolvedCurrency { .. },
                ..
            }
        )
    }

    pub fn is_ruleset_finding(&self) -> bool {
        matches!(
            self,
            Finding::RulesetNonCompliant { .. } | Finding::FormNotInBaseline { .. }
        )
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::RulesetNonCompliant {
                form,
                bilateral,
                baseline,
            } => write!(
                f,
                "ruleset entry {} dropped: {}%/{}/{}% exceeds baseline {}%/{}/{}%",
                form,
                bilateral.concentration_limit_pct,
                bilateral.priority,
                bilateral.valuation_pct,
                baseline.concentration_limit_pct,
                baseline.priority,
                baseline.valuation_pct
            ),
            Finding::FormNotInBaseline { form } => {
                write!(f, "ruleset entry {} dropped: no baseline rule", form)
            }
            Finding::HoldingExcluded {
                security_id,
                account_id,
                reason,
            } => write!(f, "holding {} in {} excluded: {}", security_id, account_id, reason),
        }
    }
}
