use crate::core::currency::CurrencyCode;
use crate::core::party::{AccountId, PartyId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger key of a deal record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(String);

impl DealId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ledger key of a transaction (margin call) record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A booked pledger/pledgee relationship and its four custody accounts.
///
/// Deals are immutable once booked; the engine only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub deal_id: DealId,
    pub pledger: PartyId,
    pub pledgee: PartyId,
    pub pledger_long_box_account: AccountId,
    pub pledger_segregated_account: AccountId,
    pub pledgee_long_box_account: AccountId,
    pub pledgee_segregated_account: AccountId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<DateTime<Utc>>,
}

impl Deal {
    /// Accounts that collateral is drawn from, in draw order.
    pub fn source_accounts(&self) -> [&AccountId; 2] {
        [&self.pledger_long_box_account, &self.pledgee_segregated_account]
    }

    /// Account that receives every allocated lot.
    pub fn destination_account(&self) -> &AccountId {
        &self.pledgee_long_box_account
    }

    /// All four accounts of the relationship.
    pub fn accounts(&self) -> [&AccountId; 4] {
        [
            &self.pledger_long_box_account,
            &self.pledger_segregated_account,
            &self.pledgee_long_box_account,
            &self.pledgee_segregated_account,
        ]
    }
}

/// Allocation progress of a margin call as stored on the ledger.
///
/// Strings written by other processes that this engine does not recognise
/// are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AllocationStatus {
    InProgress,
    Successful,
    PendingInsufficientCollateral,
    Other(String),
}

impl AllocationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AllocationStatus::InProgress => "Allocation in progress",
            AllocationStatus::Successful => "Allocation Successful",
            AllocationStatus::PendingInsufficientCollateral => {
                "Pending due to insufficient collateral"
            }
            AllocationStatus::Other(s) => s,
        }
    }
}

impl From<String> for AllocationStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Allocation in progress" => AllocationStatus::InProgress,
            "Allocation Successful" => AllocationStatus::Successful,
            "Pending due to insufficient collateral" => {
                AllocationStatus::PendingInsufficientCollateral
            }
            _ => AllocationStatus::Other(s),
        }
    }
}

impl From<AllocationStatus> for String {
    fn from(status: AllocationStatus) -> Self {
        match status {
            AllocationStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a margin call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransactionStatus {
    Pending,
    Complete,
    Other(String),
}

impl TransactionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionStatus::Pending => "Pending",
            TransactionStatus::Complete => "Complete",
            TransactionStatus::Other(s) => s,
        }
    }
}

impl From<String> for TransactionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Pending" => TransactionStatus::Pending,
            "Complete" => TransactionStatus::Complete,
            _ => TransactionStatus::Other(s),
        }
    }
}

impl From<TransactionStatus> for String {
    fn from(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A margin call: the pledger owes the pledgee collateral worth `rqv`.
///
/// Created upstream. The engine only rewrites the two status fields, the
/// margin call date and the settled `currency_conversion_rate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: TransactionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<DateTime<Utc>>,
    pub deal_id: DealId,
    pub pledger: PartyId,
    pub pledgee: PartyId,
    /// Required Qualifying Value, denominated in `currency`.
    pub rqv: Decimal,
    pub currency: CurrencyCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_conversion_rate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_call_date: Option<DateTime<Utc>>,
    pub allocation_status: AllocationStatus,
    pub transaction_status: TransactionStatus,
}

impl Transaction {
    /// A margin call as an upstream process would book it.
    pub fn new(
        transaction_id: impl Into<String>,
        deal_id: impl Into<String>,
        pledger: PartyId,
        pledgee: PartyId,
        rqv: Decimal,
        currency: CurrencyCode,
    ) -> Self {
        Self {
            transaction_id: TransactionId::new(transaction_id),
            transaction_date: None,
            deal_id: DealId::new(deal_id),
            pledger,
            pledgee,
            rqv,
            currency,
            currency_conversion_rate: None,
            margin_call_date: None,
            allocation_status: AllocationStatus::Other("Ready for allocation".to_string()),
            transaction_status: TransactionStatus::Pending,
        }
    }

    /// No further allocation may run once the call is complete.
    pub fn is_complete(&self) -> bool {
        self.transaction_status == TransactionStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_strings_round_trip() {
        for s in [
            "Allocation in progress",
            "Allocation Successful",
            "Pending due to insufficient collateral",
        ] {
            let status = AllocationStatus::from(s.to_string());
            assert!(!matches!(status, AllocationStatus::Other(_)));
            assert_eq!(String::from(status), s);
        }
    }

    #[test]
    fn test_unknown_status_preserved() {
        let status = AllocationStatus::from("Awaiting approval".to_string());
        assert_eq!(status, AllocationStatus::Other("Awaiting approval".to_string()));
        assert_eq!(status.as_str(), "Awaiting approval");
    }

    #[test]
    fn test_transaction_wire_format() {
        let mut txn = Transaction::new(
            "TXN-1",
            "DEAL-1",
            PartyId::new("P1"),
            PartyId::new("P2"),
            dec!(1000000),
            CurrencyCode::new("USD"),
        );
        txn.transaction_status = TransactionStatus::Complete;
        let json: serde_json::Value = serde_json::to_value(&txn).unwrap();
        assert_eq!(json["transactionId"], "TXN-1");
        assert_eq!(json["dealId"], "DEAL-1");
        assert_eq!(json["rqv"], "1000000");
        assert_eq!(json["transactionStatus"], "Complete");
        assert!(json.get("currencyConversionRate").is_none());
        assert!(txn.is_complete());
    }

    #[test]
    fn test_deal_routing() {
        let deal: Deal = serde_json::from_str(
            r#"{"dealId":"D","pledger":"A","pledgee":"B",
                "pledgerLongBoxAccount":"A-LB","pledgerSegregatedAccount":"A-SEG",
                "pledgeeLongBoxAccount":"B-LB","pledgeeSegregatedAccount":"B-SEG"}"#,
        )
        .unwrap();
        assert_eq!(deal.source_accounts()[0].as_str(), "A-LB");
        assert_eq!(deal.source_accounts()[1].as_str(), "B-SEG");
        assert_eq!(deal.destination_account().as_str(), "B-LB");
    }
}
