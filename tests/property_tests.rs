use collateral_engine::allocation::eligibility::EligibilityPlanner;
use collateral_engine::allocation::normalizer::{NormalizedHolding, ValueNormalizer};
use collateral_engine::allocation::selector::AllocationSelector;
use collateral_engine::core::currency::CurrencyCode;
use collateral_engine::core::ledger::HoldingBook;
use collateral_engine::core::security::CollateralForm;
use collateral_engine::engine::{plan_allocation, AllocationOutcome, EngineConfig};
use collateral_engine::engine::run::RunInputs;
use collateral_engine::policy::baseline::{BaselinePolicyTable, CollateralRule};
use collateral_engine::policy::ruleset::{BilateralRuleset, RulesetValidator};
use collateral_engine::simulation::scenario::{generate_seeded_scenario, Scenario, ScenarioConfig};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Capture a generated scenario's inputs the way the engine would.
fn inputs(scenario: &Scenario) -> RunInputs {
    RunInputs {
        deal: scenario.deal.clone(),
        transaction: scenario.transaction.clone(),
        ruleset: serde_json::from_value(scenario.ruleset.clone()).unwrap(),
        fx: serde_json::from_value(scenario.fx_rates.clone()).unwrap(),
        holdings: scenario.accounts.clone(),
        margin_call_date: scenario.margin_call_date,
    }
}

/// Generate a scenario config with a random size, RQV and currency mix.
fn arb_config() -> impl Strategy<Value = ScenarioConfig> {
    (
        1usize..40,
        1i64..5_000_000,
        prop::sample::subsequence(vec!["EUR", "GBP", "JPY"], 0..=3),
        1u64..5_000,
    )
        .prop_map(|(holding_count, rqv, extra, max_quantity)| {
            let mut currencies = vec![CurrencyCode::new("USD")];
            currencies.extend(extra.into_iter().map(CurrencyCode::new));
            ScenarioConfig {
                holding_count,
                rqv: Decimal::from(rqv),
                currencies,
                max_quantity,
                ..Default::default()
            }
        })
}

fn arb_scenario() -> impl Strategy<Value = Scenario> {
    (arb_config(), any::<u64>()).prop_map(|(config, seed)| generate_seeded_scenario(&config, seed))
}

/// A rule with every term in range.
fn arb_rule() -> impl Strategy<Value = CollateralRule> {
    (0u32..=100, 1u32..20, 0u32..=100).prop_map(|(limit, priority, valuation)| {
        CollateralRule::new(Decimal::from(limit), priority, Decimal::from(valuation))
    })
}

/// A bilateral ruleset over a few baseline forms plus one unknown form.
fn arb_ruleset() -> impl Strategy<Value = BilateralRuleset> {
    prop::collection::btree_map(
        prop::sample::select(vec![
            "CommonStocks",
            "CorporateBonds",
            "Gilt",
            "PreferredShares",
            "CryptoTokens",
        ]),
        arb_rule(),
        0..5,
    )
    .prop_map(|rules| {
        let mut ruleset = BilateralRuleset::new(Some(CurrencyCode::new("USD")));
        for (form, rule) in rules {
            ruleset.insert(CollateralForm::new(form), rule).unwrap();
        }
        ruleset
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Nothing taken exceeds its lot, and the total never exceeds what is
    /// eligible.
    #[test]
    fn plan_stays_within_holdings(scenario in arb_scenario()) {
        let report = plan_allocation(&inputs(&scenario), &EngineConfig::default()).unwrap();
        let lots: BTreeMap<_, _> = scenario
            .accounts
            .values()
            .flatten()
            .map(|h| ((h.account_id.clone(), h.security_id.clone()), h.quantity))
            .collect();
        for entry in report.plan.entries() {
            let held = lots[&(entry.source_account.clone(), entry.security_id.clone())];
            prop_assert!(entry.quantity_taken > 0);
            prop_assert!(entry.quantity_taken <= held);
        }
        let eligible: Decimal = report.eligible_by_form.values().copied().sum();
        prop_assert!(report.plan.total_value() <= eligible);
    }

    /// Per form, the value taken never passes the ceiling by a full unit.
    #[test]
    fn ceilings_overshoot_by_less_than_one_unit(scenario in arb_scenario()) {
        let report = plan_allocation(&inputs(&scenario), &EngineConfig::default()).unwrap();
        let taken = report.plan.value_by_form();
        for (form, value) in &taken {
            let ceiling = report.ceilings[form];
            let largest_unit = report
                .plan
                .entries()
                .iter()
                .filter(|e| &e.collateral_form == form)
                .map(|e| e.unit_value_base)
                .max()
                .unwrap_or(Decimal::ZERO);
            prop_assert!(*value < ceiling + largest_unit);
        }
    }

    /// Allocated runs cover the RQV; pending runs move nothing.
    #[test]
    fn outcome_matches_coverage(scenario in arb_scenario()) {
        let report = plan_allocation(&inputs(&scenario), &EngineConfig::default()).unwrap();
        let eligible: Decimal = report.eligible_by_form.values().copied().sum();
        if eligible < report.rqv_base {
            prop_assert_eq!(report.outcome, AllocationOutcome::Pending);
        }
        match report.outcome {
            AllocationOutcome::Allocated => {
                let total = report.plan.total_value();
                prop_assert!(total >= report.rqv_base);
                prop_assert!(report.coverage.is_feasible());
                if let Some(largest_unit) =
                    report.plan.entries().iter().map(|e| e.unit_value_base).max()
                {
                    prop_assert!(total < report.rqv_base + largest_unit);
                }
            }
            AllocationOutcome::Pending => {
                prop_assert!(report.commit.moves_nothing());
                prop_assert!(report.plan.entries().is_empty());
            }
        }
    }

    /// Applying the deltas conserves every security's total quantity.
    #[test]
    fn deltas_conserve_quantity(scenario in arb_scenario()) {
        let report = plan_allocation(&inputs(&scenario), &EngineConfig::default()).unwrap();
        let mut book: HoldingBook = scenario.accounts.values().flatten().cloned().collect();
        let before = book.quantities_by_security();
        for delta in &report.commit.deltas {
            book.apply(delta).unwrap();
        }
        prop_assert_eq!(book.quantities_by_security(), before);
    }

    /// Same inputs, same plan and same ledger writes.
    #[test]
    fn planning_is_deterministic(scenario in arb_scenario()) {
        let inputs = inputs(&scenario);
        let first = plan_allocation(&inputs, &EngineConfig::default()).unwrap();
        let second = plan_allocation(&inputs, &EngineConfig::default()).unwrap();
        prop_assert_eq!(
            serde_json::to_string(&first.plan).unwrap(),
            serde_json::to_string(&second.plan).unwrap()
        );
        prop_assert_eq!(&first.commit, &second.commit);
    }

    /// Validating an already validated ruleset drops nothing more.
    #[test]
    fn validation_is_idempotent(bilateral in arb_ruleset()) {
        let baseline = BaselinePolicyTable::standard();
        let usd = CurrencyCode::new("USD");
        let once = RulesetValidator::validate(&bilateral, &baseline, &usd);
        let twice = RulesetValidator::validate(&once.ruleset.to_bilateral(), &baseline, &usd);
        prop_assert!(twice.findings.is_empty());
        prop_assert_eq!(once.ruleset, twice.ruleset);
        prop_assert!(once.findings.iter().all(|f| f.is_ruleset_finding()));
    }

    /// The selector never touches the caller's ceilings and reports the
    /// headroom it left.
    #[test]
    fn selector_charges_ceilings(scenario in arb_scenario()) {
        let inputs = inputs(&scenario);
        let validated = RulesetValidator::validate(
            &inputs.ruleset,
            &BaselinePolicyTable::standard(),
            &CurrencyCode::new("USD"),
        )
        .ruleset;
        let rqv = inputs.transaction.rqv;
        let holdings: Vec<NormalizedHolding> =
            ValueNormalizer::normalize(&inputs.source_holdings(), &validated, &inputs.fx).holdings;
        let ceilings = EligibilityPlanner::ceilings(rqv, &validated);
        let snapshot = ceilings.clone();

        let plan = AllocationSelector::select(&holdings, &ceilings, rqv);
        prop_assert_eq!(&ceilings, &snapshot);
        let taken = plan.value_by_form();
        for (form, ceiling) in &ceilings {
            let used = taken.get(form).copied().unwrap_or(Decimal::ZERO);
            prop_assert_eq!(plan.remaining_ceilings()[form], *ceiling - used);
        }
    }
}
