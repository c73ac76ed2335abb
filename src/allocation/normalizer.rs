use crate::allocation::findings::{ExclusionReason, Finding};
use crate::core::currency::FxRateSnapshot;
use crate::core::party::AccountId;
use crate::core::security::{CollateralForm, Holding, SecurityId};
use crate::policy::ruleset::ValidatedRuleset;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A holding expressed in base-currency eligible value.
///
/// `unit_value_base = fx_rate * mark_price * valuation_pct / 100` and
/// `lot_value_base = unit_value_base * quantity`. Derived per run, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedHolding {
    pub security_id: SecurityId,
    pub account_id: AccountId,
    pub collateral_form: CollateralForm,
    /// Priority of the form under the validated ruleset.
    pub priority: u32,
    pub quantity: u64,
    pub unit_value_base: Decimal,
    pub lot_value_base: Decimal,
}

/// Eligible holdings plus the audit trail of everything excluded.
#[derive(Debug, Clone, Default)]
pub struct Normalization {
    pub holdings: Vec<NormalizedHolding>,
    pub findings: Vec<Finding>,
}

impl Normalization {
    /// Total eligible value.
    ///
    /// `normalize` only accepts a lot while the running total still fits a
    /// `Decimal`, so this sum and every per-form or per-account subtotal
    /// cannot overflow.
    pub fn total_value(&self) -> Decimal {
        self.holdings.iter().map(|h| h.lot_value_base).sum()
    }

    /// Eligible value per collateral form.
    pub fn value_by_form(&self) -> BTreeMap<CollateralForm, Decimal> {
        let mut totals = BTreeMap::new();
        for h in &self.holdings {
            *totals
                .entry(h.collateral_form.clone())
                .or_insert(Decimal::ZERO) += h.lot_value_base;
        }
        totals
    }

    /// Eligible value per source account.
    pub fn value_by_account(&self) -> BTreeMap<AccountId, Decimal> {
        let mut totals = BTreeMap::new();
        for h in &self.holdings {
            *totals.entry(h.account_id.clone()).or_insert(Decimal::ZERO) += h.lot_value_base;
        }
        totals
    }

    /// Number of holdings excluded because their currency has no FX rate.
    pub fn unresolved_currency_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.is_unresolved_currency())
            .count()
    }
}

/// Converts raw holdings into comparable base-currency eligible value.
pub struct ValueNormalizer;

impl ValueNormalizer {
    /// Normalize every holding, excluding (and reporting) those that cannot
    /// count toward the RQV.
    ///
    /// A holding is excluded as a whole, never partially: zero quantity,
    /// a form the ruleset does not list, a currency the ruleset does not
    /// accept, a non-positive mark price, a currency missing from the FX
    /// snapshot, or a repeat of a `(security, account)` lot already seen.
    /// A lot whose value would push the eligible total past `Decimal::MAX`
    /// is excluded as `ValueOverflow`.
    pub fn normalize(
        holdings: &[Holding],
        ruleset: &ValidatedRuleset,
        fx: &FxRateSnapshot,
    ) -> Normalization {
        let mut out = Normalization::default();
        let mut seen: BTreeSet<(&AccountId, &SecurityId)> = BTreeSet::new();
        let mut total = Decimal::ZERO;

        for holding in holdings {
            let result = if seen.insert((&holding.account_id, &holding.security_id)) {
                Self::normalize_one(holding, ruleset, fx).and_then(|normalized| {
                    total = total
                        .checked_add(normalized.lot_value_base)
                        .ok_or(ExclusionReason::ValueOverflow)?;
                    Ok(normalized)
                })
            } else {
                Err(ExclusionReason::DuplicateLot)
            };
            match result {
                Ok(normalized) => {
                    debug!(
                        "{} in {}: {} x {} = {} {}",
                        normalized.security_id,
                        normalized.account_id,
                        normalized.quantity,
                        normalized.unit_value_base,
                        normalized.lot_value_base,
                        fx.base()
                    );
                    out.holdings.push(normalized);
                }
                Err(reason) => {
                    let finding = Finding::HoldingExcluded {
                        security_id: holding.security_id.clone(),
                        account_id: holding.account_id.clone(),
                        reason,
                    };
                    warn!("{}", finding);
                    out.findings.push(finding);
                }
            }
        }
        out
    }

    /// Normalize a single holding.
    pub fn normalize_one(
        holding: &Holding,
        ruleset: &ValidatedRuleset,
        fx: &FxRateSnapshot,
    ) -> Result<NormalizedHolding, ExclusionReason> {
        if holding.quantity == 0 {
            return Err(ExclusionReason::ZeroQuantity);
        }
        let rule = ruleset
            .rule(&holding.collateral_form)
            .ok_or_else(|| ExclusionReason::FormNotEligible {
                form: holding.collateral_form.clone(),
            })?;
        if !ruleset.accepts_currency(&holding.currency) {
            return Err(ExclusionReason::CurrencyNotEligible {
                currency: holding.currency.clone(),
            });
        }
        if holding.mark_price <= Decimal::ZERO {
            return Err(ExclusionReason::NonPositivePrice {
                price: holding.mark_price,
            });
        }
        let rate = fx
            .rate_for(&holding.currency)
            .map_err(|_| ExclusionReason::UnresolvedCurrency {
                currency: holding.currency.clone(),
            })?;

        let unit_value_base = rate
            .checked_mul(holding.mark_price)
            .and_then(|v| v.checked_mul(rule.valuation_pct))
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .ok_or(ExclusionReason::ValueOverflow)?;
        let lot_value_base = unit_value_base
            .checked_mul(Decimal::from(holding.quantity))
            .ok_or(ExclusionReason::ValueOverflow)?;

        Ok(NormalizedHolding {
            security_id: holding.security_id.clone(),
            account_id: holding.account_id.clone(),
            collateral_form: holding.collateral_form.clone(),
            priority: rule.priority,
            quantity: holding.quantity,
            unit_value_base,
            lot_value_base,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::currency::CurrencyCode;
    use crate::policy::baseline::{BaselinePolicyTable, CollateralRule};
    use crate::policy::ruleset::{BilateralRuleset, RulesetValidator};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn ruleset() -> ValidatedRuleset {
        let bilateral = BilateralRuleset::new(Some(CurrencyCode::new("USD")))
            .with_rule("CommonStocks", CollateralRule::new(dec!(40), 1, dec!(97)))
            .unwrap()
            .with_rule("CorporateBonds", CollateralRule::new(dec!(30), 2, dec!(90)))
            .unwrap();
        RulesetValidator::validate(
            &bilateral,
            &BaselinePolicyTable::standard(),
            &CurrencyCode::new("USD"),
        )
        .ruleset
    }

    fn fx() -> FxRateSnapshot {
        FxRateSnapshot::new(
            CurrencyCode::new("USD"),
            NaiveDate::from_ymd_opt(2017, 3, 20).unwrap(),
        )
        .with_rate(CurrencyCode::new("EUR"), dec!(1.10))
        .unwrap()
    }

    #[test]
    fn test_unit_and_lot_value() {
        let h = Holding::new("S1", "A", "CorporateBonds", 200, dec!(50), "EUR");
        let n = ValueNormalizer::normalize_one(&h, &ruleset(), &fx()).unwrap();
        // 1.10 * 50 * 90% = 49.5
        assert_eq!(n.unit_value_base, dec!(49.5));
        assert_eq!(n.lot_value_base, dec!(9900));
        assert_eq!(n.priority, 2);
    }

    #[test]
    fn test_ineligible_form_excluded() {
        let holdings = vec![
            Holding::new("S1", "A", "CommonStocks", 10, dec!(100), "USD"),
            Holding::new("S2", "A", "Gilt", 10, dec!(100), "USD"),
        ];
        let out = ValueNormalizer::normalize(&holdings, &ruleset(), &fx());
        assert_eq!(out.holdings.len(), 1);
        assert_eq!(out.findings.len(), 1);
        assert!(matches!(
            &out.findings[0],
            Finding::HoldingExcluded { reason: ExclusionReason::FormNotEligible { .. }, .. }
        ));
    }

    #[test]
    fn test_unresolved_currency_reported() {
        let holdings = vec![Holding::new("S1", "A", "CommonStocks", 10, dec!(100), "JPY")];
        let out = ValueNormalizer::normalize(&holdings, &ruleset(), &fx());
        assert!(out.holdings.is_empty());
        assert_eq!(out.unresolved_currency_count(), 1);
    }

    #[test]
    fn test_bad_lots_excluded() {
        let holdings = vec![
            Holding::new("S1", "A", "CommonStocks", 0, dec!(100), "USD"),
            Holding::new("S2", "A", "CommonStocks", 5, dec!(0), "USD"),
            Holding::new("S3", "A", "CommonStocks", 5, dec!(10), "USD"),
            Holding::new("S3", "A", "CommonStocks", 9, dec!(10), "USD"),
        ];
        let out = ValueNormalizer::normalize(&holdings, &ruleset(), &fx());
        assert_eq!(out.holdings.len(), 1);
        assert_eq!(out.holdings[0].quantity, 5);
        let reasons: Vec<_> = out
            .findings
            .iter()
            .map(|f| match f {
                Finding::HoldingExcluded { reason, .. } => reason.clone(),
                other => panic!("unexpected finding {other:?}"),
            })
            .collect();
        assert_eq!(
            reasons,
            vec![
                ExclusionReason::ZeroQuantity,
                ExclusionReason::NonPositivePrice { price: dec!(0) },
                ExclusionReason::DuplicateLot,
            ]
        );
    }

    #[test]
    fn test_eligible_currency_restriction() {
        let bilateral = ruleset().to_bilateral().with_eligible_currency("USD");
        let restricted = RulesetValidator::validate(
            &bilateral,
            &BaselinePolicyTable::standard(),
            &CurrencyCode::new("USD"),
        )
        .ruleset;
        let h = Holding::new("S1", "A", "CommonStocks", 10, dec!(100), "EUR");
        assert_eq!(
            ValueNormalizer::normalize_one(&h, &restricted, &fx()),
            Err(ExclusionReason::CurrencyNotEligible {
                currency: CurrencyCode::new("EUR")
            })
        );
    }

    #[test]
    fn test_totals_by_form_and_account() {
        let holdings = vec![
            Holding::new("S1", "A", "CommonStocks", 10, dec!(100), "USD"),
            Holding::new("S2", "B", "CommonStocks", 10, dec!(100), "USD"),
            Holding::new("S3", "B", "CorporateBonds", 10, dec!(100), "USD"),
        ];
        let out = ValueNormalizer::normalize(&holdings, &ruleset(), &fx());
        assert_eq!(out.total_value(), dec!(2840));
        assert_eq!(out.value_by_form()[&CollateralForm::new("CommonStocks")], dec!(1940));
        assert_eq!(out.value_by_account()[&AccountId::new("B")], dec!(1870));
    }

    #[test]
    fn test_lots_past_decimal_range_excluded() {
        // Each lot fits on its own; the fifth would push the total past Decimal::MAX.
        let holdings: Vec<Holding> = (1..=5)
            .map(|i| {
                Holding::new(
                    format!("S{i}"),
                    "A",
                    "CommonStocks",
                    u64::MAX,
                    dec!(1_000_000_000),
                    "USD",
                )
            })
            .collect();
        let out = ValueNormalizer::normalize(&holdings, &ruleset(), &fx());
        assert_eq!(out.holdings.len(), 4);
        assert_eq!(
            out.findings,
            vec![Finding::HoldingExcluded {
                security_id: SecurityId::new("S5"),
                account_id: AccountId::new("A"),
                reason: ExclusionReason::ValueOverflow,
            }]
        );
        let by_form = out.value_by_form();
        assert_eq!(by_form[&CollateralForm::new("CommonStocks")], out.total_value());
        assert_eq!(out.value_by_account()[&AccountId::new("A")], out.total_value());
    }
}
