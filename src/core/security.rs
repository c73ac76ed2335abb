use crate::core::currency::CurrencyCode;
use crate::core::party::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a security (ISIN, CUSIP or internal code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityId(String);

impl SecurityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SecurityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A security category that governs eligibility, e.g. `CommonStocks`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollateralForm(String);

impl CollateralForm {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollateralForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CollateralForm {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A lot of one security held in one account.
///
/// Quantities are whole units. The allocation computation never mutates a
/// holding; it only plans deltas that the ledger applies afterwards.
///
/// # Examples
///
/// ```
/// use collateral_engine::core::security::Holding;
/// use rust_decimal_macros::dec;
///
/// let lot = Holding::new("US0378331005", "LB-PLEDGER", "CommonStocks", 1_000, dec!(172.50), "USD");
/// assert_eq!(lot.market_value(), dec!(172500));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub security_id: SecurityId,
    pub account_id: AccountId,
    #[serde(default)]
    pub security_name: String,
    #[serde(default)]
    pub security_type: String,
    pub collateral_form: CollateralForm,
    #[serde(rename = "securityQuantity", with = "quantity_str")]
    pub quantity: u64,
    /// Mark-to-market price of one unit, in `currency`.
    #[serde(rename = "mtm")]
    pub mark_price: Decimal,
    pub currency: CurrencyCode,
}

impl Holding {
    pub fn new(
        security_id: impl Into<String>,
        account_id: impl Into<String>,
        collateral_form: impl Into<String>,
        quantity: u64,
        mark_price: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            security_id: SecurityId::new(security_id),
            account_id: AccountId::new(account_id),
            security_name: String::new(),
            security_type: String::new(),
            collateral_form: CollateralForm::new(collateral_form),
            quantity,
            mark_price,
            currency: CurrencyCode::new(currency),
        }
    }

    /// Set the descriptive name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.security_name = name.into();
        self
    }

    /// Market value of the whole lot in its own currency, before haircut.
    pub fn market_value(&self) -> Decimal {
        self.mark_price * Decimal::from(self.quantity)
    }

    /// A copy of this lot with a different quantity, all other fields unchanged.
    pub fn with_quantity(&self, quantity: u64) -> Self {
        Self {
            quantity,
            ..self.clone()
        }
    }

    /// A copy of this lot re-homed to another account with the given quantity.
    pub fn moved_to(&self, account_id: &AccountId, quantity: u64) -> Self {
        Self {
            account_id: account_id.clone(),
            quantity,
            ..self.clone()
        }
    }
}

/// Quantities travel as decimal strings on the ledger wire, like every other
/// numeric field; numbers are accepted on input.
pub(crate) mod quantity_str {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(quantity: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&quantity.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        struct V;
        impl<'de> Visitor<'de> for V {
            type Value = u64;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer quantity")
            }
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
                Ok(v)
            }
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
                u64::try_from(v).map_err(|_| E::custom(format!("negative quantity: {v}")))
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
                v.trim()
                    .parse()
                    .map_err(|_| E::custom(format!("invalid quantity: {v:?}")))
            }
        }
        deserializer.deserialize_any(V)
    }
}
