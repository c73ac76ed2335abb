//! Basic margin-call allocation example.
//!
//! Books a deal, a margin call and the pledger's holdings in an in-memory
//! ledger, then runs one allocation and prints where the collateral went.

use chrono::{TimeZone, Utc};
use collateral_engine::core::currency::CurrencyCode;
use collateral_engine::core::deal::{Deal, DealId, Transaction};
use collateral_engine::core::party::{AccountId, PartyId};
use collateral_engine::core::security::Holding;
use collateral_engine::engine::{AllocationEngine, StartAllocation};
use collateral_engine::simulation::scenario::Scenario;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::BTreeMap;

fn main() {
    println!("╔════════════════════════════════════════════════╗");
    println!("║  collateral-engine: Basic Allocation Example   ║");
    println!("╚════════════════════════════════════════════════╝\n");

    let pledger = PartyId::new("BANK-A");
    let pledgee = PartyId::new("BANK-B");
    let deal = Deal {
        deal_id: DealId::new("DEAL-2017-001"),
        pledger: pledger.clone(),
        pledgee: pledgee.clone(),
        pledger_long_box_account: AccountId::new("BANK-A-LB"),
        pledger_segregated_account: AccountId::new("BANK-A-SEG"),
        pledgee_long_box_account: AccountId::new("BANK-B-LB"),
        pledgee_segregated_account: AccountId::new("BANK-B-SEG"),
        issue_date: None,
    };

    // A 250,000 GBP margin call against a USD-based ruleset.
    let transaction = Transaction::new(
        "MC-0001",
        "DEAL-2017-001",
        pledger,
        pledgee,
        dec!(250_000),
        CurrencyCode::new("GBP"),
    );

    let mut accounts: BTreeMap<AccountId, Vec<Holding>> = deal
        .accounts()
        .into_iter()
        .map(|a| (a.clone(), Vec::new()))
        .collect();
    let lots = [
        Holding::new("US0378331005", "BANK-A-LB", "CommonStocks", 1_000, dec!(141.46), "USD")
            .with_name("Apple Inc."),
        Holding::new("US5949181045", "BANK-A-LB", "CommonStocks", 800, dec!(64.87), "USD")
            .with_name("Microsoft Corp."),
        Holding::new("US912828U816", "BANK-B-SEG", "USTreasuryNotes", 2_000, dec!(99.25), "USD")
            .with_name("UST 2% 2021"),
        Holding::new("GB00B128DP45", "BANK-B-SEG", "Gilt", 1_500, dec!(104.10), "GBP")
            .with_name("UK Gilt 4.25% 2027"),
        Holding::new("XS1234567890", "BANK-A-LB", "CorporateBonds", 900, dec!(101.50), "EUR")
            .with_name("Siemens 1.5% 2025"),
    ];
    for lot in lots {
        accounts.entry(lot.account_id.clone()).or_default().push(lot);
    }

    let scenario = Scenario {
        deal,
        transaction,
        accounts,
        ruleset: json!({
            "Security": {
                "CommonStocks": [40, 1, 97],
                "CorporateBonds": [30, 2, 95],
                "USTreasuryNotes": [25, 6, 95],
                "Gilt": [25, 7, 94],
            },
            "baseCurrency": "USD",
            "eligibleCurrency": ["USD", "GBP", "EUR"],
        }),
        fx_rates: json!({
            "base": "USD",
            "date": "2017-03-20",
            "rates": { "GBP": "1.2366", "EUR": "1.0740" },
        }),
        margin_call_date: Utc.with_ymd_and_hms(2017, 3, 20, 10, 0, 0).unwrap(),
    };

    let harness = scenario.harness().expect("scenario loads");
    let engine = AllocationEngine::default();
    let request = StartAllocation::new("DEAL-2017-001", "MC-0001", scenario.margin_call_date);

    let report = engine
        .start_allocation(&harness.services(), &request)
        .expect("allocation runs");
    println!("{}", report);

    println!("━━━ Pledgee long box after allocation ━━━\n");
    for holding in harness.ledger.book().holdings_in(&AccountId::new("BANK-B-LB")) {
        println!(
            "  {:<14} {:<20} {:>8} @ {} {}",
            holding.security_id.as_str(),
            holding.security_name,
            holding.quantity,
            holding.mark_price,
            holding.currency
        );
    }

    println!("\n━━━ Events ━━━\n");
    for event in harness.events.events() {
        println!("  [{}] {}: {}", event.code, event.transaction_id, event.message);
    }
}
