//! Constants used throughout the Placard library.
//!
//! Central definitions for the order key alphabet, identifier prefixes and the
//! default tunables of the optimistic pipeline.

/// Digits of an order key, in ascending value. ASCII order matches digit value,
/// so canonical keys compare correctly as plain strings.
pub const KEY_DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Radix of order keys.
pub const KEY_BASE: u8 = 62;

/// Maximum number of digits an allocator hands out before reporting exhaustion.
pub const DEFAULT_MAX_KEY_LEN: usize = 48;

/// Prefix of identifiers minted by a client before the repository confirms them.
pub const TENTATIVE_PREFIX: &str = "tmp-";

/// How long the pipeline waits for a repository acknowledgment.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5_000;

/// Sends per mutation before the pipeline gives up on it.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Buffered remote changes per board before slow subscribers are dropped.
pub const FEED_CAPACITY: usize = 256;

/// Committed changes and token results a repository keeps per board.
pub const DEFAULT_LOG_RETENTION: usize = 1_024;
