//! Principal identity.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The owning identity of memories and leases.
///
/// Principals are wallet addresses compared case-insensitively, so the
/// canonical form is trimmed and lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Parses and normalizes a principal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the input is empty or contains
    /// whitespace.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use memlease::Principal;
    ///
    /// let principal = Principal::parse("  0xABCdef ").unwrap();
    /// assert_eq!(principal.as_str(), "0xabcdef");
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("principal cannot be empty".to_string()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(Error::InvalidInput(format!(
                "principal '{trimmed}' must not contain whitespace"
            )));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    /// Returns the normalized principal as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Principal {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lowercases() {
        let p = Principal::parse("0xABC").unwrap();
        assert_eq!(p.as_str(), "0xabc");
        assert_eq!(p, Principal::parse("0xabc").unwrap());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(
            Principal::parse("   "),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_parse_rejects_inner_whitespace() {
        assert!(Principal::parse("0x ab").is_err());
    }
}
