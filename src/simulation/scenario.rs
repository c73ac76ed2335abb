//! Self-contained allocation scenarios.
//!
//! A scenario file carries everything one run reads: the deal, the margin
//! call, the holdings of each account and the raw ruleset and FX payloads.
//! [`ScenarioHarness`] loads it into in-memory services so the engine can
//! run against it unchanged. Random scenarios feed the benchmarks, the
//! property tests and the CLI `generate` command.

use crate::core::currency::CurrencyCode;
use crate::core::deal::{Deal, DealId, Transaction};
use crate::core::ledger::BookError;
use crate::core::party::{AccountId, PartyId};
use crate::core::security::Holding;
use crate::engine::dispatch::StartAllocation;
use crate::engine::run::Services;
use crate::policy::baseline::BaselinePolicyTable;
use crate::service::memory::{MemoryLedger, RecordingEventSink, StaticFxRates, StaticRuleset};
use crate::service::ServiceError;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("cannot read scenario {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid holdings: {0}")]
    Book(#[from] BookError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// One allocation request and the world it runs against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub deal: Deal,
    pub transaction: Transaction,
    /// Holdings per account.
    pub accounts: BTreeMap<AccountId, Vec<Holding>>,
    /// Ruleset service payload, verbatim.
    pub ruleset: serde_json::Value,
    /// FX service payload, verbatim.
    pub fx_rates: serde_json::Value,
    pub margin_call_date: DateTime<Utc>,
}

impl Scenario {
    pub fn from_json(body: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&body)
    }

    /// The `start_allocation` request this scenario describes.
    pub fn request(&self) -> StartAllocation {
        StartAllocation {
            deal_id: self.deal.deal_id.clone(),
            transaction_id: self.transaction.transaction_id.clone(),
            margin_call_date: self.margin_call_date,
        }
    }

    /// Load the scenario into in-memory services.
    pub fn harness(&self) -> Result<ScenarioHarness, ScenarioError> {
        let ledger = MemoryLedger::new();
        ledger.insert_deal(&self.deal)?;
        ledger.insert_transaction(&self.transaction)?;
        for holdings in self.accounts.values() {
            for holding in holdings {
                ledger.insert_holding(holding.clone())?;
            }
        }
        Ok(ScenarioHarness {
            ledger,
            rulesets: StaticRuleset::new(serde_json::to_vec(&self.ruleset)?),
            fx: StaticFxRates::new(serde_json::to_vec(&self.fx_rates)?),
            events: RecordingEventSink::new(),
        })
    }
}

/// In-memory services loaded from a [`Scenario`].
#[derive(Debug)]
pub struct ScenarioHarness {
    pub ledger: MemoryLedger,
    pub rulesets: StaticRuleset,
    pub fx: StaticFxRates,
    pub events: RecordingEventSink,
}

impl ScenarioHarness {
    pub fn services(&self) -> Services<'_> {
        Services {
            ledger: &self.ledger,
            deals: &self.ledger,
            accounts: &self.ledger,
            rulesets: &self.rulesets,
            fx: &self.fx,
            commit: &self.ledger,
            events: &self.events,
        }
    }
}

/// Configuration for generating a random scenario.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Number of lots spread over the two source accounts.
    pub holding_count: usize,
    /// RQV in the transaction currency.
    pub rqv: Decimal,
    /// Holding currencies; the first is also the transaction currency.
    pub currencies: Vec<CurrencyCode>,
    pub base_currency: CurrencyCode,
    pub max_quantity: u64,
    /// Mark price range, in cents.
    pub price_cents: (i64, i64),
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            holding_count: 20,
            rqv: Decimal::from(1_000_000),
            currencies: vec![CurrencyCode::new("USD")],
            base_currency: CurrencyCode::new("USD"),
            max_quantity: 10_000,
            price_cents: (100, 50_000),
        }
    }
}

/// Generate a random scenario.
pub fn generate_random_scenario(config: &ScenarioConfig) -> Scenario {
    generate_with(config, &mut rand::thread_rng())
}

/// Generate a reproducible scenario from a seed.
pub fn generate_seeded_scenario(config: &ScenarioConfig, seed: u64) -> Scenario {
    generate_with(config, &mut StdRng::seed_from_u64(seed))
}

fn generate_with<R: Rng>(config: &ScenarioConfig, rng: &mut R) -> Scenario {
    let pledger = PartyId::new("PLEDGER-001");
    let pledgee = PartyId::new("PLEDGEE-001");
    let deal = Deal {
        deal_id: DealId::new("DEAL-001"),
        pledger: pledger.clone(),
        pledgee: pledgee.clone(),
        pledger_long_box_account: AccountId::new("PLEDGER-001-LB"),
        pledger_segregated_account: AccountId::new("PLEDGER-001-SEG"),
        pledgee_long_box_account: AccountId::new("PLEDGEE-001-LB"),
        pledgee_segregated_account: AccountId::new("PLEDGEE-001-SEG"),
        issue_date: None,
    };

    let currencies = if config.currencies.is_empty() {
        vec![config.base_currency.clone()]
    } else {
        config.currencies.clone()
    };
    let transaction = Transaction::new(
        "TX-001",
        deal.deal_id.as_str(),
        pledger,
        pledgee,
        config.rqv,
        currencies[0].clone(),
    );

    let baseline = BaselinePolicyTable::standard();
    let forms: Vec<_> = baseline.rules().keys().cloned().collect();
    let sources = [
        deal.pledger_long_box_account.clone(),
        deal.pledgee_segregated_account.clone(),
    ];

    let mut accounts: BTreeMap<AccountId, Vec<Holding>> = deal
        .accounts()
        .into_iter()
        .map(|a| (a.clone(), Vec::new()))
        .collect();
    let (min_cents, max_cents) = config.price_cents;
    for i in 0..config.holding_count {
        let account = &sources[rng.gen_range(0..sources.len())];
        let form = &forms[rng.gen_range(0..forms.len())];
        let currency = &currencies[rng.gen_range(0..currencies.len())];
        let price = Decimal::new(rng.gen_range(min_cents.max(1)..=max_cents.max(1)), 2);
        let quantity = rng.gen_range(1..=config.max_quantity.max(1));
        let holding = Holding::new(
            format!("SEC-{:05}", i),
            account.as_str(),
            form.as_str(),
            quantity,
            price,
            currency.as_str(),
        )
        .with_name(format!("{} issue {}", form, i));
        if let Some(list) = accounts.get_mut(account) {
            list.push(holding);
        }
    }

    // Every baseline form at its baseline terms, which always validates.
    let security: serde_json::Map<String, serde_json::Value> = baseline
        .rules()
        .iter()
        .map(|(form, rule)| {
            (
                form.as_str().to_string(),
                json!({
                    "concentrationLimitPct": rule.concentration_limit_pct,
                    "priority": rule.priority,
                    "valuationPct": rule.valuation_pct,
                }),
            )
        })
        .collect();
    let ruleset = json!({
        "Security": security,
        "baseCurrency": config.base_currency,
        "eligibleCurrency": [],
    });

    let rates: BTreeMap<String, Decimal> = currencies
        .iter()
        .filter(|c| **c != config.base_currency)
        .map(|c| (c.as_str().to_string(), Decimal::new(rng.gen_range(50..=200), 2)))
        .collect();
    let as_of = NaiveDate::from_ymd_opt(2017, 3, 20).unwrap_or_default();
    let fx_rates = json!({
        "base": config.base_currency,
        "date": as_of,
        "rates": rates,
    });

    Scenario {
        deal,
        transaction,
        accounts,
        ruleset,
        fx_rates,
        margin_call_date: Utc.from_utc_datetime(&as_of.and_hms_opt(10, 0, 0).unwrap_or_default()),
    }
}
