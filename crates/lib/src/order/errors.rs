//! Error types for order key allocation.

use thiserror::Error;

/// Errors produced by [`KeyAllocator`](super::KeyAllocator) and key parsing.
///
/// `RangeExhausted` is recovered by the board aggregate through a rebalance and
/// never reaches callers of the aggregate.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// No key of the allowed length fits strictly between the bounds.
    #[error("No order key fits between {lower} and {upper}")]
    RangeExhausted {
        /// Lower bound, or `START`
        lower: String,
        /// Upper bound, or `END`
        upper: String,
    },

    /// The lower bound is not strictly below the upper bound.
    #[error("Invalid key range: {lower} is not below {upper}")]
    InvalidRange {
        /// Lower bound
        lower: String,
        /// Upper bound
        upper: String,
    },

    /// A key string is empty, uses a foreign digit, or ends in `0`.
    #[error("Malformed order key {key:?}: {reason}")]
    MalformedKey {
        /// The offending input
        key: String,
        /// What is wrong with it
        reason: &'static str,
    },
}

impl OrderError {
    /// Check if this error is recoverable by rebalancing the sequence.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, OrderError::RangeExhausted { .. })
    }

    /// Check if this error came from parsing untrusted input.
    pub fn is_malformed(&self) -> bool {
        matches!(self, OrderError::MalformedKey { .. })
    }
}

impl From<OrderError> for crate::Error {
    fn from(err: OrderError) -> Self {
        crate::Error::Order(err)
    }
}
