use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// ISO 4217-style currency code.
///
/// # Examples
///
/// ```
/// use collateral_engine::core::currency::CurrencyCode;
///
/// let usd = CurrencyCode::new("USD");
/// let gbp = CurrencyCode::new("GBP");
/// assert_ne!(usd, gbp);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Errors arising from FX snapshot operations.
#[derive(Debug, Error)]
pub enum FxError {
    #[error("no FX rate for {currency} in the {base} snapshot")]
    RateNotFound {
        base: CurrencyCode,
        currency: CurrencyCode,
    },
    #[error("FX rate must be positive, got {rate} for {currency}")]
    InvalidRate { currency: CurrencyCode, rate: Decimal },
    #[error("malformed FX payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Wire shape of the FX rate service: `{base, date, rates: {currency: rate}}`.
#[derive(Deserialize)]
struct FxPayload {
    base: CurrencyCode,
    date: NaiveDate,
    #[serde(default)]
    rates: BTreeMap<CurrencyCode, Decimal>,
}

impl TryFrom<FxPayload> for FxRateSnapshot {
    type Error = FxError;

    fn try_from(payload: FxPayload) -> Result<Self, Self::Error> {
        let mut snapshot = FxRateSnapshot::new(payload.base, payload.date);
        for (currency, rate) in payload.rates {
            snapshot.set_rate(currency, rate)?;
        }
        Ok(snapshot)
    }
}

/// Immutable set of FX rates captured once per allocation run.
///
/// A rate is the multiplier that turns one unit of `currency` into the
/// snapshot's base currency, so `value_in_base = rate * amount`. The base
/// currency always converts at exactly one, whether or not the service
/// listed it.
///
/// # Examples
///
/// ```
/// use collateral_engine::core::currency::{CurrencyCode, FxRateSnapshot};
/// use chrono::NaiveDate;
/// use rust_decimal_macros::dec;
///
/// let mut fx = FxRateSnapshot::new(
///     CurrencyCode::new("USD"),
///     NaiveDate::from_ymd_opt(2017, 3, 20).unwrap(),
/// );
/// fx.set_rate(CurrencyCode::new("GBP"), dec!(1.25)).unwrap();
///
/// let converted = fx.to_base(dec!(1000), &CurrencyCode::new("GBP")).unwrap();
/// assert_eq!(converted, dec!(1250));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FxPayload")]
pub struct FxRateSnapshot {
    base: CurrencyCode,
    #[serde(rename = "date")]
    as_of: NaiveDate,
    rates: BTreeMap<CurrencyCode, Decimal>,
}

impl FxRateSnapshot {
    pub fn new(base: CurrencyCode, as_of: NaiveDate) -> Self {
        Self {
            base,
            as_of,
            rates: BTreeMap::new(),
        }
    }

    /// Parse the FX service payload, rejecting non-positive rates.
    pub fn from_json(bytes: &[u8]) -> Result<Self, FxError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Set the rate for one currency.
    pub fn set_rate(&mut self, currency: CurrencyCode, rate: Decimal) -> Result<(), FxError> {
        if rate <= Decimal::ZERO {
            return Err(FxError::InvalidRate { currency, rate });
        }
        self.rates.insert(currency, rate);
        Ok(())
    }

    /// Builder form of [`set_rate`](Self::set_rate).
    pub fn with_rate(mut self, currency: CurrencyCode, rate: Decimal) -> Result<Self, FxError> {
        self.set_rate(currency, rate)?;
        Ok(self)
    }

    pub fn base(&self) -> &CurrencyCode {
        &self.base
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn rates(&self) -> &BTreeMap<CurrencyCode, Decimal> {
        &self.rates
    }

    /// Rate that converts one unit of `currency` into the base currency.
    pub fn rate_for(&self, currency: &CurrencyCode) -> Result<Decimal, FxError> {
        if currency == &self.base {
            return Ok(Decimal::ONE);
        }
        self.rates
            .get(currency)
            .copied()
            .ok_or_else(|| FxError::RateNotFound {
                base: self.base.clone(),
                currency: currency.clone(),
            })
    }

    /// Convert an amount denominated in `currency` into the base currency.
    pub fn to_base(&self, amount: Decimal, currency: &CurrencyCode) -> Result<Decimal, FxError> {
        Ok(self.rate_for(currency)? * amount)
    }
}
