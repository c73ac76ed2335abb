use super::error::AllocationError;
use super::run::AllocationReport;
use crate::core::deal::{AllocationStatus, DealId, TransactionId};
use chrono::{DateTime, Utc};

/// Arguments of `start_allocation <dealId> <transactionId> <marginCallTimestamp>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAllocation {
    pub deal_id: DealId,
    pub transaction_id: TransactionId,
    pub margin_call_date: DateTime<Utc>,
}

impl StartAllocation {
    pub fn new(
        deal_id: impl Into<String>,
        transaction_id: impl Into<String>,
        margin_call_date: DateTime<Utc>,
    ) -> Self {
        Self {
            deal_id: DealId::new(deal_id),
            transaction_id: TransactionId::new(transaction_id),
            margin_call_date,
        }
    }

    /// Parse positional arguments. The timestamp is RFC 3339.
    pub fn from_args(args: &[String]) -> Result<Self, AllocationError> {
        let [deal_id, transaction_id, timestamp] = args else {
            return Err(arity("start_allocation", 3, args.len()));
        };
        let margin_call_date = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| {
                AllocationError::InvalidInput(format!(
                    "margin call timestamp {:?} is not RFC 3339: {}",
                    timestamp, e
                ))
            })?
            .with_timezone(&Utc);
        non_empty("dealId", deal_id)?;
        non_empty("transactionId", transaction_id)?;
        Ok(Self::new(deal_id.as_str(), transaction_id.as_str(), margin_call_date))
    }
}

/// A named operation with its arguments already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    StartAllocation(StartAllocation),
    UpdateAllocationStatus {
        transaction_id: TransactionId,
        status: AllocationStatus,
    },
}

impl Operation {
    /// Route an operation name and its positional arguments.
    ///
    /// Unknown names and wrong argument counts are rejected here, before
    /// anything touches the ledger.
    pub fn parse(name: &str, args: &[String]) -> Result<Self, AllocationError> {
        match name {
            "start_allocation" => Ok(Operation::StartAllocation(StartAllocation::from_args(args)?)),
            "update_allocation_status" => {
                let [transaction_id, status] = args else {
                    return Err(arity(name, 2, args.len()));
                };
                non_empty("transactionId", transaction_id)?;
                non_empty("status", status)?;
                Ok(Operation::UpdateAllocationStatus {
                    transaction_id: TransactionId::new(transaction_id.as_str()),
                    status: AllocationStatus::from(status.clone()),
                })
            }
            other => Err(AllocationError::InvalidInput(format!(
                "unknown operation {:?}",
                other
            ))),
        }
    }
}

/// What a dispatched operation returns.
#[derive(Debug)]
pub enum Response {
    Allocation(Box<AllocationReport>),
    StatusUpdated {
        transaction_id: TransactionId,
        status: AllocationStatus,
    },
}

fn arity(operation: &str, expected: usize, got: usize) -> AllocationError {
    AllocationError::InvalidInput(format!(
        "{} expects {} arguments, got {}",
        operation, expected, got
    ))
}

fn non_empty(field: &str, value: &str) -> Result<(), AllocationError> {
    if value.trim().is_empty() {
        return Err(AllocationError::InvalidInput(format!("{} is empty", field)));
    }
    Ok(())
}
