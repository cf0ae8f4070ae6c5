//! Currency and country value objects plus minor-unit arithmetic helpers.
//!
//! Amounts are always `i64` minor units (cents, kobo, shillings for
//! zero-decimal currencies). Providers that report major units go through
//! [`Currency::parse_major_amount`] which never touches floating point.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ValidationError;

/// ISO-4217 currency code, stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

/// Currencies whose smallest unit is the major unit.
const ZERO_DECIMAL: &[&str] = &["JPY", "KRW", "UGX", "RWF", "XOF", "XAF", "VND"];

impl Currency {
    /// Parses and normalizes a three-letter currency code.
    pub fn new(code: impl AsRef<str>) -> Result<Self, ValidationError> {
        let code = code.as_ref().trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid_format(
                "currency",
                format!("'{}' is not a three-letter code", code),
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Builds a currency from a compile-time constant. Only for known-good codes.
    pub(crate) fn from_static(code: &'static str) -> Self {
        Self(code.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of decimal places between major and minor units.
    pub fn minor_unit_exponent(&self) -> u32 {
        if ZERO_DECIMAL.contains(&self.0.as_str()) {
            0
        } else {
            2
        }
    }

    /// Converts a decimal major-unit string ("50.25") into minor units.
    ///
    /// Rejects values carrying more precision than the currency allows,
    /// except trailing zeros.
    pub fn parse_major_amount(&self, raw: &str) -> Result<i64, ValidationError> {
        let raw = raw.trim();
        let invalid = |reason: &str| ValidationError::invalid_format("amount", reason.to_string());

        let (negative, unsigned) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (whole, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid("empty amount"));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("not a decimal number"));
        }

        let exponent = self.minor_unit_exponent() as usize;
        let significant = frac.trim_end_matches('0');
        if significant.len() > exponent {
            return Err(invalid("more precision than the currency supports"));
        }

        let mut digits = String::with_capacity(whole.len() + exponent);
        digits.push_str(if whole.is_empty() { "0" } else { whole });
        digits.push_str(significant);
        for _ in significant.len()..exponent {
            digits.push('0');
        }

        let value: i64 = digits.parse().map_err(|_| invalid("amount overflows"))?;
        Ok(if negative { -value } else { value })
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

/// ISO-3166 alpha-2 country code, stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    pub fn new(code: impl AsRef<str>) -> Result<Self, ValidationError> {
        let code = code.as_ref().trim();
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid_format(
                "country",
                format!("'{}' is not a two-letter code", code),
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CountryCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CountryCode> for String {
    fn from(c: CountryCode) -> Self {
        c.0
    }
}

/// Formats minor units back into a major-unit decimal string.
pub fn format_minor_amount(amount: i64, currency: &Currency) -> String {
    let exponent = currency.minor_unit_exponent();
    if exponent == 0 {
        return amount.to_string();
    }
    let divisor = 10_i64.pow(exponent);
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!(
        "{}{}.{:0width$}",
        sign,
        abs / divisor as u64,
        abs % divisor as u64,
        width = exponent as usize
    )
}
