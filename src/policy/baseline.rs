use crate::core::security::CollateralForm;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Eligibility terms for one collateral form.
///
/// Lower `priority` numbers are drawn first. Percentages are whole-percent
/// figures in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralRule {
    /// Maximum share of the RQV that may come from this form.
    pub concentration_limit_pct: Decimal,
    pub priority: u32,
    /// Share of market value that counts toward the RQV (100 minus haircut).
    pub valuation_pct: Decimal,
}

/// A rule whose terms are out of range.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("concentration limit {0}% is outside 0..=100")]
    ConcentrationOutOfRange(Decimal),
    #[error("valuation percentage {0}% is outside 0..=100")]
    ValuationOutOfRange(Decimal),
    #[error("priority must be at least 1")]
    ZeroPriority,
}

impl CollateralRule {
    pub fn new(concentration_limit_pct: Decimal, priority: u32, valuation_pct: Decimal) -> Self {
        Self {
            concentration_limit_pct,
            priority,
            valuation_pct,
        }
    }

    /// Check that every term is in range.
    pub fn check(&self) -> Result<(), RuleError> {
        let pct = Decimal::ZERO..=dec!(100);
        if !pct.contains(&self.concentration_limit_pct) {
            return Err(RuleError::ConcentrationOutOfRange(
                self.concentration_limit_pct,
            ));
        }
        if !pct.contains(&self.valuation_pct) {
            return Err(RuleError::ValuationOutOfRange(self.valuation_pct));
        }
        if self.priority == 0 {
            return Err(RuleError::ZeroPriority);
        }
        Ok(())
    }

    /// True when this rule is looser than `baseline` on all three axes at
    /// once: a higher concentration limit, a numerically higher (weaker)
    /// priority, and a higher valuation percentage.
    pub fn exceeds_on_every_axis(&self, baseline: &CollateralRule) -> bool {
        self.concentration_limit_pct > baseline.concentration_limit_pct
            && self.priority > baseline.priority
            && self.valuation_pct > baseline.valuation_pct
    }
}

/// Errors in a baseline policy table.
#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("baseline rule for {form} is invalid: {source}")]
    InvalidRule {
        form: CollateralForm,
        #[source]
        source: RuleError,
    },
    #[error("priority {priority} is shared by {first} and {second}")]
    DuplicatePriority {
        priority: u32,
        first: CollateralForm,
        second: CollateralForm,
    },
}

/// Firm-wide ceiling on how permissive any bilateral ruleset may be.
///
/// Priorities form a strict total order: no two forms share one. The table
/// is an explicit immutable value handed to the validator, never global
/// state.
///
/// # Examples
///
/// ```
/// use collateral_engine::policy::baseline::BaselinePolicyTable;
/// use collateral_engine::core::security::CollateralForm;
///
/// let table = BaselinePolicyTable::standard();
/// let stocks = table.get(&CollateralForm::new("CommonStocks")).unwrap();
/// assert_eq!(stocks.priority, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<CollateralForm, CollateralRule>",
    into = "BTreeMap<CollateralForm, CollateralRule>"
)]
pub struct BaselinePolicyTable {
    rules: BTreeMap<CollateralForm, CollateralRule>,
}

impl BaselinePolicyTable {
    /// Build a table, rejecting out-of-range rules and shared priorities.
    pub fn new(
        rules: impl IntoIterator<Item = (CollateralForm, CollateralRule)>,
    ) -> Result<Self, BaselineError> {
        let rules: BTreeMap<CollateralForm, CollateralRule> = rules.into_iter().collect();
        let mut seen: BTreeMap<u32, &CollateralForm> = BTreeMap::new();
        for (form, rule) in &rules {
            rule.check().map_err(|source| BaselineError::InvalidRule {
                form: form.clone(),
                source,
            })?;
            if let Some(first) = seen.insert(rule.priority, form) {
                return Err(BaselineError::DuplicatePriority {
                    priority: rule.priority,
                    first: first.clone(),
                    second: form.clone(),
                });
            }
        }
        Ok(Self { rules })
    }

    /// The firm's standard fifteen-form table.
    pub fn standard() -> Self {
        let rows: [(&str, Decimal, u32, Decimal); 15] = [
            ("CommonStocks", dec!(40), 1, dec!(97)),
            ("CorporateBonds", dec!(30), 2, dec!(97)),
            ("SovereignBonds", dec!(25), 3, dec!(95)),
            ("USTreasuryBills", dec!(25), 4, dec!(95)),
            ("USTreasuryBonds", dec!(25), 5, dec!(95)),
            ("USTreasuryNotes", dec!(25), 6, dec!(95)),
            ("Gilt", dec!(25), 7, dec!(94)),
            ("FederalAgencyBonds", dec!(20), 8, dec!(93)),
            ("GlobalBonds", dec!(20), 9, dec!(92)),
            ("PreferredShares", dec!(20), 10, dec!(91)),
            ("ConvertibleBonds", dec!(20), 11, dec!(90)),
            ("RevenueBonds", dec!(15), 12, dec!(90)),
            ("MediumTermNote", dec!(15), 13, dec!(89)),
            ("ShortTermInvestments", dec!(15), 14, dec!(87)),
            ("BuilderBonds", dec!(15), 15, dec!(85)),
        ];
        Self {
            rules: rows
                .into_iter()
                .map(|(form, limit, priority, valuation)| {
                    (
                        CollateralForm::new(form),
                        CollateralRule::new(limit, priority, valuation),
                    )
                })
                .collect(),
        }
    }

    pub fn get(&self, form: &CollateralForm) -> Option<&CollateralRule> {
        self.rules.get(form)
    }

    pub fn rules(&self) -> &BTreeMap<CollateralForm, CollateralRule> {
        &self.rules
    }

    /// Forms in draw order (ascending priority).
    pub fn by_priority(&self) -> Vec<(&CollateralForm, &CollateralRule)> {
        let mut rows: Vec<_> = self.rules.iter().collect();
        rows.sort_by_key(|(_, rule)| rule.priority);
        rows
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for BaselinePolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<BTreeMap<CollateralForm, CollateralRule>> for BaselinePolicyTable {
    type Error = BaselineError;

    fn try_from(rules: BTreeMap<CollateralForm, CollateralRule>) -> Result<Self, Self::Error> {
        Self::new(rules)
    }
}

impl From<BaselinePolicyTable> for BTreeMap<CollateralForm, CollateralRule> {
    fn from(table: BaselinePolicyTable) -> Self {
        table.rules
    }
}

impl std::fmt::Display for BaselinePolicyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Baseline Policy ===")?;
        writeln!(
            f,
            "{:<4} {:<22} {:>14} {:>10}",
            "Prio", "Collateral form", "Concentration", "Valuation"
        )?;
        for (form, rule) in self.by_priority() {
            writeln!(
                f,
                "{:<4} {:<22} {:>13}% {:>9}%",
                rule.priority,
                form.as_str(),
                rule.concentration_limit_pct,
                rule.valuation_pct
            )?;
        }
        Ok(())
    }
}
