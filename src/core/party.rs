use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a counterparty to a deal: the pledger who owes collateral
/// or the pledgee who receives it.
///
/// # Examples
///
/// ```
/// use collateral_engine::core::party::PartyId;
///
/// let pledger = PartyId::new("ACME-CAPITAL");
/// let pledgee = PartyId::new("NORTHBANK");
/// assert_ne!(pledger, pledgee);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this party ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartyId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a custody account (long-box or segregated).
///
/// A holding is owned by exactly one account at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_party_display() {
        let p = PartyId::new("NORTHBANK");
        assert_eq!(format!("{}", p), "NORTHBANK");
    }

    #[test]
    fn test_account_ordering() {
        let a = AccountId::new("ACC-001");
        let b = AccountId::new("ACC-002");
        assert!(a < b);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&AccountId::new("LB-1")).unwrap();
        assert_eq!(json, "\"LB-1\"");
    }
}
