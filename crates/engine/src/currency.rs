use serde::{Deserialize, Serialize};

use crate::EngineError;

/// ISO-like currency code attached to an account.
///
/// The ledger does not convert between currencies: the code is a label kept
/// next to the account so callers know how to format its amounts. Every
/// amount is stored as integer cents (see [`MoneyCents`](crate::MoneyCents)).
///
/// A code is exactly three upper-case ASCII letters; input is trimmed and
/// upper-cased before validation. The default is `EUR`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Canonical currency code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self("EUR".to_string())
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl TryFrom<&str> for CurrencyCode {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let code = value.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(EngineError::InvalidField(format!(
                "invalid currency code: {value:?}"
            )));
        }
        Ok(Self(code))
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        let code = CurrencyCode::try_from(" usd ").unwrap();
        assert_eq!(code.code(), "USD");
        assert_eq!(CurrencyCode::default().to_string(), "EUR");
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(CurrencyCode::try_from("EU").is_err());
        assert!(CurrencyCode::try_from("EURO").is_err());
        assert!(CurrencyCode::try_from("E1R").is_err());
        assert!(CurrencyCode::try_from("").is_err());
    }
}
