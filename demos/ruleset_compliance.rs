//! Bilateral ruleset compliance example.
//!
//! Validates a negotiated ruleset against the firm's baseline policy table
//! and shows which entries survive, which are dropped, and what that does to
//! the concentration ceilings of a margin call.

use collateral_engine::allocation::eligibility::EligibilityPlanner;
use collateral_engine::core::currency::CurrencyCode;
use collateral_engine::policy::baseline::BaselinePolicyTable;
use collateral_engine::policy::ruleset::{BilateralRuleset, RulesetValidator};
use rust_decimal_macros::dec;

fn main() {
    println!("╔═════════════════════════════════════════════════╗");
    println!("║  collateral-engine: Ruleset Compliance Example  ║");
    println!("╚═════════════════════════════════════════════════╝\n");

    let baseline = BaselinePolicyTable::standard();
    println!("{}", baseline);

    // Terms as the ruleset service returns them:
    // [concentrationLimit, priority, valuationPercentage]
    let payload = br#"{
        "Security": {
            "CommonStocks":    [45, 1, 98],
            "CorporateBonds":  [30, 1, 99],
            "Gilt":            [30, 8, 96],
            "MunicipalBonds":  [20, 9, 90],
            "USTreasuryBills": { "concentrationLimitPct": 25, "priority": 4, "valuationPct": 95 }
        },
        "baseCurrency": "USD",
        "eligibleCurrency": ["USD", "GBP"]
    }"#;
    let bilateral = BilateralRuleset::from_json(payload).expect("payload parses");

    println!("━━━ Validation ━━━\n");
    let validation = RulesetValidator::validate(&bilateral, &baseline, &CurrencyCode::new("USD"));
    for (form, rule) in validation.ruleset.rules() {
        println!(
            "  kept     {:<18} {:>4}% / {:>2} / {:>4}%",
            form.as_str(),
            rule.concentration_limit_pct,
            rule.priority,
            rule.valuation_pct
        );
    }
    for finding in &validation.findings {
        println!("  dropped  {}", finding);
    }

    // CommonStocks is looser on limit and valuation but keeps the baseline
    // priority, so it stays. Gilt is looser on all three and is dropped.
    println!("\n━━━ Ceilings for a 2,000,000 USD margin call ━━━\n");
    let ceilings = EligibilityPlanner::ceilings(dec!(2_000_000), &validation.ruleset);
    for (form, ceiling) in &ceilings {
        println!("  {:<18} {:>14}", form.as_str(), ceiling);
    }
}
