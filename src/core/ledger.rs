use crate::core::deal::Transaction;
use crate::core::party::AccountId;
use crate::core::security::{Holding, SecurityId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// One instruction for the account service.
///
/// Reductions of source lots are expressed as `Update` (quantity shrinks) or
/// `Delete` (lot fully taken); every taken lot produces one `Add` at the
/// destination account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerDelta {
    Update {
        holding: Holding,
    },
    Delete {
        security_id: SecurityId,
        account_id: AccountId,
    },
    Add {
        holding: Holding,
    },
}

impl LedgerDelta {
    pub fn account_id(&self) -> &AccountId {
        match self {
            LedgerDelta::Update { holding } | LedgerDelta::Add { holding } => &holding.account_id,
            LedgerDelta::Delete { account_id, .. } => account_id,
        }
    }

    pub fn security_id(&self) -> &SecurityId {
        match self {
            LedgerDelta::Update { holding } | LedgerDelta::Add { holding } => &holding.security_id,
            LedgerDelta::Delete { security_id, .. } => security_id,
        }
    }
}

/// Everything one allocation run writes, to be committed as a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSet {
    pub deltas: Vec<LedgerDelta>,
    pub transaction: Transaction,
}

impl CommitSet {
    /// True when the run moves no securities (e.g. insufficient collateral).
    pub fn moves_nothing(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// Errors raised when a delta does not fit the current holdings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookError {
    #[error("no holding of {security_id} in account {account_id}")]
    UnknownHolding {
        security_id: SecurityId,
        account_id: AccountId,
    },
    #[error("holding of {security_id} in account {account_id} already exists")]
    DuplicateHolding {
        security_id: SecurityId,
        account_id: AccountId,
    },
    #[error("add of {security_id} into {account_id} conflicts with the lot already held there")]
    IncompatibleLot {
        security_id: SecurityId,
        account_id: AccountId,
    },
    #[error("add of {security_id} into {account_id} overflows the lot quantity")]
    QuantityOverflow {
        security_id: SecurityId,
        account_id: AccountId,
    },
}

/// Holdings keyed by `(account, security)`.
///
/// This is the in-memory picture of the account service's state. Applying a
/// set of allocation deltas must conserve the total quantity of every
/// security across accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingBook {
    #[serde(with = "lots_serde")]
    lots: BTreeMap<(AccountId, SecurityId), Holding>,
}

mod lots_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        lots: &BTreeMap<(AccountId, SecurityId), Holding>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(lots.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<(AccountId, SecurityId), Holding>, D::Error> {
        let holdings = Vec::<Holding>::deserialize(deserializer)?;
        let mut lots = BTreeMap::new();
        for h in holdings {
            let key = (h.account_id.clone(), h.security_id.clone());
            if lots.insert(key, h).is_some() {
                return Err(serde::de::Error::custom("duplicate (account, security) lot"));
            }
        }
        Ok(lots)
    }
}

impl HoldingBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh lot; an existing lot for the same key is an error.
    pub fn insert(&mut self, holding: Holding) -> Result<(), BookError> {
        let key = (holding.account_id.clone(), holding.security_id.clone());
        if self.lots.contains_key(&key) {
            return Err(BookError::DuplicateHolding {
                security_id: key.1,
                account_id: key.0,
            });
        }
        self.lots.insert(key, holding);
        Ok(())
    }

    pub fn get(&self, account_id: &AccountId, security_id: &SecurityId) -> Option<&Holding> {
        self.lots.get(&(account_id.clone(), security_id.clone()))
    }

    /// All lots held in one account, ordered by security id.
    pub fn holdings_in(&self, account_id: &AccountId) -> Vec<Holding> {
        self.lots
            .iter()
            .filter(|((acct, _), _)| acct == account_id)
            .map(|(_, h)| h.clone())
            .collect()
    }

    /// Replace an existing lot.
    pub fn update(&mut self, holding: &Holding) -> Result<(), BookError> {
        let key = (holding.account_id.clone(), holding.security_id.clone());
        match self.lots.get_mut(&key) {
            Some(slot) => {
                *slot = holding.clone();
                Ok(())
            }
            None => Err(BookError::UnknownHolding {
                security_id: key.1,
                account_id: key.0,
            }),
        }
    }

    pub fn delete(&mut self, security_id: &SecurityId, account_id: &AccountId) -> Result<(), BookError> {
        self.lots
            .remove(&(account_id.clone(), security_id.clone()))
            .map(|_| ())
            .ok_or_else(|| BookError::UnknownHolding {
                security_id: security_id.clone(),
                account_id: account_id.clone(),
            })
    }

    /// Credit a lot. If the account already holds the same security the
    /// quantities are summed, provided the lots describe the same instrument.
    pub fn add(&mut self, holding: &Holding) -> Result<(), BookError> {
        let key = (holding.account_id.clone(), holding.security_id.clone());
        match self.lots.get_mut(&key) {
            Some(existing) => {
                if existing.collateral_form != holding.collateral_form
                    || existing.currency != holding.currency
                {
                    return Err(BookError::IncompatibleLot {
                        security_id: key.1,
                        account_id: key.0,
                    });
                }
                existing.quantity = existing
                    .quantity
                    .checked_add(holding.quantity)
                    .ok_or(BookError::QuantityOverflow {
                        security_id: key.1,
                        account_id: key.0,
                    })?;
                Ok(())
            }
            None => {
                self.lots.insert(key, holding.clone());
                Ok(())
            }
        }
    }

    /// Apply one allocation delta.
    pub fn apply(&mut self, delta: &LedgerDelta) -> Result<(), BookError> {
        match delta {
            LedgerDelta::Update { holding } => self.update(holding),
            LedgerDelta::Delete {
                security_id,
                account_id,
            } => self.delete(security_id, account_id),
            LedgerDelta::Add { holding } => self.add(holding),
        }
    }

    /// Total units of a security across every account.
    pub fn total_quantity(&self, security_id: &SecurityId) -> u64 {
        self.lots
            .iter()
            .filter(|((_, sec), _)| sec == security_id)
            .map(|(_, h)| h.quantity)
            .sum()
    }

    /// Total units per security, used to check conservation.
    pub fn quantities_by_security(&self) -> BTreeMap<SecurityId, u64> {
        let mut totals: BTreeMap<SecurityId, u64> = BTreeMap::new();
        for ((_, sec), h) in &self.lots {
            *totals.entry(sec.clone()).or_insert(0) += h.quantity;
        }
        totals
    }

    pub fn len(&self) -> usize {
        self.lots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }
}

impl FromIterator<Holding> for HoldingBook {
    /// Later lots with the same key replace earlier ones.
    fn from_iter<T: IntoIterator<Item = Holding>>(iter: T) -> Self {
        Self {
            lots: iter
                .into_iter()
                .map(|h| ((h.account_id.clone(), h.security_id.clone()), h))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lot(sec: &str, acct: &str, qty: u64) -> Holding {
        Holding::new(sec, acct, "CommonStocks", qty, dec!(10), "USD")
    }

    #[test]
    fn test_move_conserves_quantity() {
        let mut book: HoldingBook = vec![lot("S1", "A", 100)].into_iter().collect();
        let before = book.quantities_by_security();

        book.apply(&LedgerDelta::Update {
            holding: lot("S1", "A", 60),
        })
        .unwrap();
        book.apply(&LedgerDelta::Add {
            holding: lot("S1", "B", 40),
        })
        .unwrap();

        assert_eq!(book.quantities_by_security(), before);
        assert_eq!(book.get(&AccountId::new("B"), &SecurityId::new("S1")).unwrap().quantity, 40);
    }

    #[test]
    fn test_delete_unknown_fails() {
        let mut book = HoldingBook::new();
        let err = book
            .delete(&SecurityId::new("S1"), &AccountId::new("A"))
            .unwrap_err();
        assert!(matches!(err, BookError::UnknownHolding { .. }));
    }

    #[test]
    fn test_add_merges_same_instrument() {
        let mut book: HoldingBook = vec![lot("S1", "B", 5)].into_iter().collect();
        book.add(&lot("S1", "B", 7)).unwrap();
        assert_eq!(book.total_quantity(&SecurityId::new("S1")), 12);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_add_rejects_incompatible_lot() {
        let mut book: HoldingBook = vec![lot("S1", "B", 5)].into_iter().collect();
        let mut other = lot("S1", "B", 1);
        other.currency = "EUR".into();
        assert!(matches!(
            book.add(&other),
            Err(BookError::IncompatibleLot { .. })
        ));
    }

    #[test]
    fn test_add_overflowing_quantity_fails() {
        let mut book: HoldingBook = vec![lot("S1", "B", u64::MAX - 1)].into_iter().collect();
        assert_eq!(
            book.add(&lot("S1", "B", 2)),
            Err(BookError::QuantityOverflow {
                security_id: SecurityId::new("S1"),
                account_id: AccountId::new("B"),
            })
        );
        assert_eq!(book.total_quantity(&SecurityId::new("S1")), u64::MAX - 1);
        book.add(&lot("S1", "B", 1)).unwrap();
        assert_eq!(book.total_quantity(&SecurityId::new("S1")), u64::MAX);
    }

    #[test]
    fn test_delta_serializes_with_op_tag() {
        let delta = LedgerDelta::Delete {
            security_id: SecurityId::new("S1"),
            account_id: AccountId::new("A"),
        };
        let json: serde_json::Value = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["op"], "delete");
        assert_eq!(json["security_id"], "S1");
    }

    #[test]
    fn test_book_serde_rejects_duplicates() {
        let json = serde_json::to_string(&vec![lot("S1", "A", 1), lot("S1", "A", 2)]).unwrap();
        let wrapped = format!("{{\"lots\":{}}}", json);
        assert!(serde_json::from_str::<HoldingBook>(&wrapped).is_err());
    }
}
