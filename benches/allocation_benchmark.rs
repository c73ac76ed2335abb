use collateral_engine::allocation::eligibility::EligibilityPlanner;
use collateral_engine::allocation::normalizer::ValueNormalizer;
use collateral_engine::allocation::selector::AllocationSelector;
use collateral_engine::core::currency::CurrencyCode;
use collateral_engine::engine::run::RunInputs;
use collateral_engine::engine::{plan_allocation, EngineConfig};
use collateral_engine::policy::baseline::BaselinePolicyTable;
use collateral_engine::policy::ruleset::RulesetValidator;
use collateral_engine::simulation::scenario::{generate_seeded_scenario, Scenario, ScenarioConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;

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

fn scenario(holding_count: usize) -> Scenario {
    let config = ScenarioConfig {
        holding_count,
        rqv: Decimal::from(holding_count as u64 * 50_000),
        currencies: ["USD", "EUR", "GBP", "JPY"]
            .into_iter()
            .map(CurrencyCode::new)
            .collect(),
        ..Default::default()
    };
    generate_seeded_scenario(&config, 42)
}

fn bench_plan(c: &mut Criterion, holding_count: usize) {
    let inputs = inputs(&scenario(holding_count));
    let config = EngineConfig::default();

    c.bench_function(&format!("plan_allocation_{}_lots", holding_count), |b| {
        b.iter(|| plan_allocation(black_box(&inputs), black_box(&config)))
    });
}

fn bench_plan_100_lots(c: &mut Criterion) {
    bench_plan(c, 100);
}

fn bench_plan_1000_lots(c: &mut Criterion) {
    bench_plan(c, 1_000);
}

fn bench_plan_10000_lots(c: &mut Criterion) {
    bench_plan(c, 10_000);
}

fn bench_selector_10000_lots(c: &mut Criterion) {
    let inputs = inputs(&scenario(10_000));
    let ruleset = RulesetValidator::validate(
        &inputs.ruleset,
        &BaselinePolicyTable::standard(),
        &CurrencyCode::new("USD"),
    )
    .ruleset;
    let normalized = ValueNormalizer::normalize(&inputs.source_holdings(), &ruleset, &inputs.fx);
    let rqv = inputs.transaction.rqv;
    let ceilings = EligibilityPlanner::ceilings(rqv, &ruleset);

    c.bench_function("selector_10000_lots", |b| {
        b.iter(|| AllocationSelector::select(black_box(&normalized.holdings), &ceilings, rqv))
    });
}

criterion_group!(
    benches,
    bench_plan_100_lots,
    bench_plan_1000_lots,
    bench_plan_10000_lots,
    bench_selector_10000_lots
);
criterion_main!(benches);
