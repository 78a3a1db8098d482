//! The [`OrderKey`] value type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::OrderError;
use crate::constants::{KEY_BASE, KEY_DIGITS};

/// Position of an item among its siblings.
///
/// A key is a base-62 fraction `0.d1d2d3...` written as its digits. Canonical
/// keys never end in `0`, which makes string comparison agree with numeric
/// comparison: `"1" < "1V" < "2"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderKey(String);

impl OrderKey {
    /// Parse and validate a key received from outside the allocator.
    pub fn parse(raw: impl Into<String>) -> Result<Self, OrderError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(OrderError::MalformedKey {
                key: raw,
                reason: "empty key",
            });
        }
        if raw.bytes().any(|b| digit_value(b).is_none()) {
            return Err(OrderError::MalformedKey {
                key: raw,
                reason: "digit outside 0-9A-Za-z",
            });
        }
        if raw.ends_with('0') {
            return Err(OrderError::MalformedKey {
                key: raw,
                reason: "trailing zero digit",
            });
        }
        Ok(Self(raw))
    }

    /// Build a key from digit values. Callers guarantee canonical form.
    pub(crate) fn from_digits(digits: &[u8]) -> Self {
        debug_assert!(!digits.is_empty() && digits.last() != Some(&0));
        Self(
            digits
                .iter()
                .map(|&d| KEY_DIGITS[usize::from(d)] as char)
                .collect(),
        )
    }

    /// Digit values of this key.
    pub(crate) fn digits(&self) -> Vec<u8> {
        // Validated on construction
        self.0.bytes().filter_map(digit_value).collect()
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of digits; grows as a gap is repeatedly split.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a valid key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub(crate) fn digit_value(byte: u8) -> Option<u8> {
    let value = match byte {
        b'0'..=b'9' => byte - b'0',
        b'A'..=b'Z' => byte - b'A' + 10,
        b'a'..=b'z' => byte - b'a' + 36,
        _ => return None,
    };
    debug_assert!(value < KEY_BASE);
    Some(value)
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OrderKey {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrderKey {
    type Error = OrderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<OrderKey> for String {
    fn from(key: OrderKey) -> Self {
        key.0
    }
}

impl AsRef<str> for OrderKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
