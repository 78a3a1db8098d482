//! Order key allocation.
//!
//! Lists within a board and cards within a list are ordered by an [`OrderKey`].
//! Inserting or moving an item only ever computes a key for that item:
//! [`KeyAllocator::key_between`] finds a fraction strictly between the two
//! neighbours, so no sibling is rewritten. Keys grow by roughly one digit per
//! six splits of the same gap; once a key would exceed the allocator's maximum
//! length the gap is exhausted and the whole sequence is respaced with
//! [`KeyAllocator::rebalance`].

mod errors;
mod key;

pub use errors::OrderError;
pub use key::OrderKey;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_KEY_LEN, KEY_BASE};

/// Hands out order keys bounded to a maximum number of digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAllocator {
    max_len: usize,
}

impl Default for KeyAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEY_LEN)
    }
}

impl KeyAllocator {
    /// Create an allocator whose keys never exceed `max_len` digits.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
        }
    }

    /// Longest key this allocator will produce.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Returns a key strictly between `lower` and `upper`.
    ///
    /// A missing `lower` stands for the start of the sequence and a missing
    /// `upper` for its end.
    ///
    /// # Errors
    /// * [`OrderError::InvalidRange`] if `lower >= upper`
    /// * [`OrderError::RangeExhausted`] if the only keys in the gap are longer
    ///   than [`max_len`](Self::max_len)
    pub fn key_between(
        &self,
        lower: Option<&OrderKey>,
        upper: Option<&OrderKey>,
    ) -> Result<OrderKey, OrderError> {
        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo >= hi {
                return Err(OrderError::InvalidRange {
                    lower: lo.to_string(),
                    upper: hi.to_string(),
                });
            }
        }

        let lower_digits = lower.map(OrderKey::digits).unwrap_or_default();
        let upper_digits = upper.map(OrderKey::digits);
        let digits = midpoint(&lower_digits, upper_digits.as_deref());

        if digits.len() > self.max_len {
            return Err(OrderError::RangeExhausted {
                lower: bound_name(lower, "START"),
                upper: bound_name(upper, "END"),
            });
        }
        Ok(OrderKey::from_digits(&digits))
    }

    /// Returns `count` ascending keys spread evenly over the whole key space.
    ///
    /// All keys share the shortest length that leaves at least 62 free keys
    /// between neighbours, so the next few dozen inserts anywhere stay short.
    pub fn spread(&self, count: usize) -> Result<Vec<OrderKey>, OrderError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let exhausted = || OrderError::RangeExhausted {
            lower: "START".to_string(),
            upper: "END".to_string(),
        };
        let base = u128::from(KEY_BASE);
        let needed = (count as u128 + 1)
            .checked_mul(base)
            .ok_or_else(exhausted)?;

        let mut len = 1usize;
        let mut span = base;
        while span < needed {
            len += 1;
            span = span.checked_mul(base).ok_or_else(exhausted)?;
        }
        if len > self.max_len {
            return Err(exhausted());
        }

        let step = span / (count as u128 + 1);
        Ok((1..=count as u128)
            .map(|i| OrderKey::from_digits(&encode_fixed(step * i, len)))
            .collect())
    }

    /// Assigns fresh, evenly spaced keys to `items`, preserving their order.
    pub fn rebalance<T: Clone>(&self, items: &[T]) -> Result<Vec<(T, OrderKey)>, OrderError> {
        let keys = self.spread(items.len())?;
        Ok(items.iter().cloned().zip(keys).collect())
    }
}

fn bound_name(bound: Option<&OrderKey>, open: &str) -> String {
    bound.map_or_else(|| open.to_string(), OrderKey::to_string)
}

/// Digits of a fraction strictly between `lower` and `upper` (`None` = 1).
///
/// `lower` may be empty (= 0). Requires `lower < upper`; the result never ends
/// in a zero digit.
fn midpoint(lower: &[u8], upper: Option<&[u8]>) -> Vec<u8> {
    if let Some(upper) = upper {
        let shared = upper
            .iter()
            .enumerate()
            .take_while(|&(i, &d)| lower.get(i).copied().unwrap_or(0) == d)
            .count();
        if shared > 0 {
            let mut out = upper[..shared].to_vec();
            let rest = lower.get(shared..).unwrap_or(&[]);
            out.extend(midpoint(rest, Some(&upper[shared..])));
            return out;
        }
    }

    let lo = lower.first().copied().unwrap_or(0);
    let hi = upper.and_then(|u| u.first().copied()).unwrap_or(KEY_BASE);

    if hi.saturating_sub(lo) > 1 {
        return vec![(lo + hi) / 2];
    }
    match upper {
        // The upper key continues past its first digit, so that digit alone
        // already sits above `lower` and below `upper`.
        Some(upper) if upper.len() > 1 => vec![upper[0]],
        _ => {
            let mut out = vec![lo];
            out.extend(midpoint(lower.get(1..).unwrap_or(&[]), None));
            out
        }
    }
}

/// `value` written as exactly `len` base-62 digits, trailing zeros dropped.
fn encode_fixed(mut value: u128, len: usize) -> Vec<u8> {
    let base = u128::from(KEY_BASE);
    let mut digits = vec![0u8; len];
    for slot in digits.iter_mut().rev() {
        *slot = (value % base) as u8;
        value /= base;
    }
    while digits.last() == Some(&0) {
        digits.pop();
    }
    digits
}
