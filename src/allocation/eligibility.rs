use crate::core::security::CollateralForm;
use crate::policy::ruleset::ValidatedRuleset;
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-form maximum base-currency value sourceable for one RQV.
pub type Ceilings = BTreeMap<CollateralForm, Decimal>;

/// Result of the feasibility pre-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageCheck {
    pub rqv: Decimal,
    /// `min(ceiling, eligible value)` per form.
    pub coverable_by_form: BTreeMap<CollateralForm, Decimal>,
    /// Sum of `coverable_by_form`.
    pub coverable: Decimal,
}

impl CoverageCheck {
    pub fn is_feasible(&self) -> bool {
        self.coverable >= self.rqv
    }

    /// How far eligible collateral falls short of the RQV.
    pub fn shortfall(&self) -> Decimal {
        (self.rqv - self.coverable).max(Decimal::ZERO)
    }
}

/// Derives concentration ceilings from the RQV.
pub struct EligibilityPlanner;

impl EligibilityPlanner {
    /// `ceiling[form] = rqv * concentration_limit_pct[form] / 100` for every
    /// form in the validated ruleset, independent of what is actually held.
    ///
    /// The limit is scaled to a fraction first. Validated limits lie in
    /// `0..=100`, so a ceiling never exceeds the RQV and cannot overflow.
    pub fn ceilings(rqv: Decimal, ruleset: &ValidatedRuleset) -> Ceilings {
        ruleset
            .rules()
            .iter()
            .map(|(form, rule)| {
                let fraction = rule.concentration_limit_pct / Decimal::ONE_HUNDRED;
                let ceiling = rqv * fraction;
                debug!("ceiling {}: {}", form, ceiling);
                (form.clone(), ceiling)
            })
            .collect()
    }

    /// Sum `min(ceiling, held value)` across forms. The run is infeasible
    /// when that sum is strictly below the RQV.
    pub fn coverage(
        rqv: Decimal,
        ceilings: &Ceilings,
        value_by_form: &BTreeMap<CollateralForm, Decimal>,
    ) -> CoverageCheck {
        let coverable_by_form: BTreeMap<CollateralForm, Decimal> = ceilings
            .iter()
            .map(|(form, ceiling)| {
                let held = value_by_form.get(form).copied().unwrap_or(Decimal::ZERO);
                (form.clone(), (*ceiling).min(held))
            })
            .collect();
        let coverable = coverable_by_form.values().copied().sum();
        CoverageCheck {
            rqv,
            coverable_by_form,
            coverable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::currency::CurrencyCode;
    use crate::policy::baseline::{BaselinePolicyTable, CollateralRule};
    use crate::policy::ruleset::{BilateralRuleset, RulesetValidator};
    use rust_decimal_macros::dec;

    fn ruleset() -> ValidatedRuleset {
        let bilateral = BilateralRuleset::new(None)
            .with_rule("CommonStocks", CollateralRule::new(dec!(40), 1, dec!(100)))
            .unwrap()
            .with_rule("CorporateBonds", CollateralRule::new(dec!(30), 2, dec!(100)))
            .unwrap();
        RulesetValidator::validate(
            &bilateral,
            &BaselinePolicyTable::standard(),
            &CurrencyCode::new("USD"),
        )
        .ruleset
    }

    #[test]
    fn test_ceilings_from_rqv() {
        let ceilings = EligibilityPlanner::ceilings(dec!(1_000_000), &ruleset());
        assert_eq!(ceilings[&CollateralForm::new("CommonStocks")], dec!(400_000));
        assert_eq!(ceilings[&CollateralForm::new("CorporateBonds")], dec!(300_000));
        assert_eq!(ceilings.len(), 2);
    }

    #[test]
    fn test_ceilings_at_decimal_max() {
        let ceilings = EligibilityPlanner::ceilings(Decimal::MAX, &ruleset());
        let stocks = ceilings[&CollateralForm::new("CommonStocks")];
        let bonds = ceilings[&CollateralForm::new("CorporateBonds")];
        assert!(stocks > bonds);
        assert!(stocks < Decimal::MAX);
        assert!(bonds > Decimal::ZERO);
    }

    #[test]
    fn test_coverage_caps_each_form() {
        let ceilings = EligibilityPlanner::ceilings(dec!(1_000_000), &ruleset());
        let held = BTreeMap::from([
            (CollateralForm::new("CommonStocks"), dec!(500_000)),
            (CollateralForm::new("CorporateBonds"), dec!(800_000)),
        ]);
        let check = EligibilityPlanner::coverage(dec!(1_000_000), &ceilings, &held);
        assert_eq!(check.coverable, dec!(700_000));
        assert_eq!(check.shortfall(), dec!(300_000));
        assert!(!check.is_feasible());
    }

    #[test]
    fn test_coverage_exactly_rqv_is_feasible() {
        let ceilings = EligibilityPlanner::ceilings(dec!(100), &ruleset());
        let held = BTreeMap::from([
            (CollateralForm::new("CommonStocks"), dec!(40)),
            (CollateralForm::new("CorporateBonds"), dec!(30)),
        ]);
        let check = EligibilityPlanner::coverage(dec!(70), &ceilings, &held);
        assert!(check.is_feasible());
        assert_eq!(check.shortfall(), Decimal::ZERO);
    }
}
