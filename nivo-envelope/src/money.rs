use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("currency code {0:?} is not a 3-letter ISO 4217 code")]
    InvalidCurrency(String),
    #[error("cross-currency operation between {0} and {1}")]
    CurrencyMismatch(Currency, Currency),
}

/// An ISO 4217 currency code, stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Result<Self, MoneyError> {
        let code = code.as_ref();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(MoneyError::InvalidCurrency(code.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn inr() -> Self {
        Self("INR".to_string())
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monetary amount expressed in integer minor units (e.g. paise) of a
/// specific currency. Never backed by a float; arithmetic across mismatched
/// currencies is a compile-time-checked runtime error, never silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money {
    minor_units: i64,
}

impl Money {
    pub const ZERO: Money = Money { minor_units: 0 };

    pub fn from_minor(minor_units: i64) -> Result<Self, MoneyError> {
        if minor_units <= 0 {
            return Err(MoneyError::NonPositiveAmount);
        }
        Ok(Self { minor_units })
    }

    /// Constructs a possibly-zero or negative amount, used for internal
    /// bookkeeping (deltas) where the positive-amount invariant doesn't
    /// apply.
    #[must_use]
    pub fn delta(minor_units: i64) -> Self {
        Self { minor_units }
    }

    #[must_use]
    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    #[must_use]
    pub fn checked_add(&self, other: &Money) -> Option<Money> {
        self.minor_units
            .checked_add(other.minor_units)
            .map(Money::delta)
    }

    #[must_use]
    pub fn checked_sub(&self, other: &Money) -> Option<Money> {
        self.minor_units
            .checked_sub(other.minor_units)
            .map(Money::delta)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.minor_units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_normalizes_to_uppercase() {
        let currency = Currency::new("inr").expect("valid currency");
        assert_eq!(currency.as_str(), "INR");
    }

    #[test]
    fn currency_rejects_wrong_length() {
        assert!(Currency::new("RUPEE").is_err());
        assert!(Currency::new("IN").is_err());
    }

    #[test]
    fn money_rejects_non_positive_amounts() {
        assert_eq!(Money::from_minor(0), Err(MoneyError::NonPositiveAmount));
        assert_eq!(Money::from_minor(-1), Err(MoneyError::NonPositiveAmount));
        assert!(Money::from_minor(1).is_ok());
    }
}
