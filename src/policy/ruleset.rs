use crate::allocation::findings::Finding;
use crate::core::currency::CurrencyCode;
use crate::core::security::CollateralForm;
use crate::policy::baseline::{BaselinePolicyTable, CollateralRule, RuleError};
use log::warn;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors parsing a bilateral ruleset payload.
#[derive(Debug, Error)]
pub enum RulesetError {
    #[error("malformed ruleset payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("ruleset entry for {form} is invalid: {source}")]
    InvalidRule {
        form: CollateralForm,
        #[source]
        source: RuleError,
    },
    #[error("ruleset entry for {form} has non-integer priority {value}")]
    BadPriority { form: CollateralForm, value: Decimal },
}

/// One `Security` entry as the ruleset service sends it: either the tagged
/// object or the legacy positional triple
/// `[concentrationLimit, priority, valuationPercentage]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RuleWire {
    Tagged(TaggedRule),
    Positional([Decimal; 3]),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TaggedRule {
    #[serde(alias = "ConcentrationLimit", alias = "concentrationLimit")]
    concentration_limit_pct: Decimal,
    #[serde(alias = "Priority")]
    priority: Decimal,
    #[serde(alias = "ValuationPercentage", alias = "valuationPercentage")]
    valuation_pct: Decimal,
}

#[derive(Deserialize)]
struct RulesetPayload {
    #[serde(rename = "Security", alias = "security")]
    security: BTreeMap<CollateralForm, RuleWire>,
    #[serde(rename = "baseCurrency", alias = "BaseCurrency", default)]
    base_currency: Option<CurrencyCode>,
    #[serde(rename = "eligibleCurrency", alias = "EligibleCurrency", default)]
    eligible_currency: BTreeSet<CurrencyCode>,
}

impl TryFrom<RulesetPayload> for BilateralRuleset {
    type Error = RulesetError;

    fn try_from(payload: RulesetPayload) -> Result<Self, Self::Error> {
        let mut ruleset = BilateralRuleset {
            rules: BTreeMap::new(),
            base_currency: payload.base_currency,
            eligible_currencies: payload.eligible_currency,
        };
        for (form, wire) in payload.security {
            let (limit, priority, valuation) = match wire {
                RuleWire::Tagged(t) => (t.concentration_limit_pct, t.priority, t.valuation_pct),
                RuleWire::Positional([limit, priority, valuation]) => (limit, priority, valuation),
            };
            let priority = priority
                .fract()
                .is_zero()
                .then(|| priority.to_u32())
                .flatten()
                .ok_or(RulesetError::BadPriority {
                    form: form.clone(),
                    value: priority,
                })?;
            ruleset.insert(form, CollateralRule::new(limit, priority, valuation))?;
        }
        Ok(ruleset)
    }
}

/// The eligibility terms agreed between one pledger and one pledgee.
///
/// Parsing validates the shape and range of every entry; unknown or
/// malformed entries are rejected rather than coerced. Whether the terms are
/// acceptable under firm policy is a separate step, see [`RulesetValidator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RulesetPayload")]
pub struct BilateralRuleset {
    #[serde(rename = "Security")]
    rules: BTreeMap<CollateralForm, CollateralRule>,
    #[serde(rename = "baseCurrency", skip_serializing_if = "Option::is_none")]
    base_currency: Option<CurrencyCode>,
    #[serde(rename = "eligibleCurrency")]
    eligible_currencies: BTreeSet<CurrencyCode>,
}

impl BilateralRuleset {
    pub fn new(base_currency: Option<CurrencyCode>) -> Self {
        Self {
            rules: BTreeMap::new(),
            base_currency,
            eligible_currencies: BTreeSet::new(),
        }
    }

    /// Parse the ruleset service payload.
    pub fn from_json(bytes: &[u8]) -> Result<Self, RulesetError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Add or replace the rule for one form.
    pub fn insert(&mut self, form: CollateralForm, rule: CollateralRule) -> Result<(), RulesetError> {
        rule.check().map_err(|source| RulesetError::InvalidRule {
            form: form.clone(),
            source,
        })?;
        self.rules.insert(form, rule);
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_rule(
        mut self,
        form: impl Into<String>,
        rule: CollateralRule,
    ) -> Result<Self, RulesetError> {
        self.insert(CollateralForm::new(form), rule)?;
        Ok(self)
    }

    /// Restrict eligible holdings to one more currency.
    pub fn with_eligible_currency(mut self, currency: impl Into<String>) -> Self {
        self.eligible_currencies.insert(CurrencyCode::new(currency));
        self
    }

    pub fn rules(&self) -> &BTreeMap<CollateralForm, CollateralRule> {
        &self.rules
    }

    pub fn base_currency(&self) -> Option<&CurrencyCode> {
        self.base_currency.as_ref()
    }

    pub fn eligible_currencies(&self) -> &BTreeSet<CurrencyCode> {
        &self.eligible_currencies
    }
}

/// A bilateral ruleset that has passed the baseline check. This is the only
/// ruleset the planning stages accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedRuleset {
    rules: BTreeMap<CollateralForm, CollateralRule>,
    base_currency: CurrencyCode,
    eligible_currencies: BTreeSet<CurrencyCode>,
}

impl ValidatedRuleset {
    pub fn rule(&self, form: &CollateralForm) -> Option<&CollateralRule> {
        self.rules.get(form)
    }

    pub fn rules(&self) -> &BTreeMap<CollateralForm, CollateralRule> {
        &self.rules
    }

    pub fn base_currency(&self) -> &CurrencyCode {
        &self.base_currency
    }

    /// An empty set means every currency with an FX rate is eligible.
    pub fn accepts_currency(&self, currency: &CurrencyCode) -> bool {
        self.eligible_currencies.is_empty() || self.eligible_currencies.contains(currency)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Back to the bilateral form, e.g. to re-validate.
    pub fn to_bilateral(&self) -> BilateralRuleset {
        BilateralRuleset {
            rules: self.rules.clone(),
            base_currency: Some(self.base_currency.clone()),
            eligible_currencies: self.eligible_currencies.clone(),
        }
    }
}

/// Outcome of validating a bilateral ruleset.
#[derive(Debug, Clone)]
pub struct RulesetValidation {
    pub ruleset: ValidatedRuleset,
    pub findings: Vec<Finding>,
}

/// Merges a bilateral ruleset with the baseline policy table.
pub struct RulesetValidator;

impl RulesetValidator {
    /// Validate `bilateral` against `baseline`.
    ///
    /// An entry is dropped when the baseline has no rule for its form, or
    /// when it is looser than baseline on all three axes simultaneously.
    /// Dropped entries become findings; the run continues with the rest.
    /// `default_base` applies when the ruleset names no base currency.
    pub fn validate(
        bilateral: &BilateralRuleset,
        baseline: &BaselinePolicyTable,
        default_base: &CurrencyCode,
    ) -> RulesetValidation {
        let mut rules = BTreeMap::new();
        let mut findings = Vec::new();

        for (form, rule) in &bilateral.rules {
            let finding = match baseline.get(form) {
                None => Finding::FormNotInBaseline { form: form.clone() },
                Some(base) if rule.exceeds_on_every_axis(base) => Finding::RulesetNonCompliant {
                    form: form.clone(),
                    bilateral: *rule,
                    baseline: *base,
                },
                Some(_) => {
                    rules.insert(form.clone(), *rule);
                    continue;
                }
            };
            warn!("{}", finding);
            findings.push(finding);
        }

        RulesetValidation {
            ruleset: ValidatedRuleset {
                rules,
                base_currency: bilateral
                    .base_currency
                    .clone()
                    .unwrap_or_else(|| default_base.clone()),
                eligible_currencies: bilateral.eligible_currencies.clone(),
            },
            findings,
        }
    }
}
