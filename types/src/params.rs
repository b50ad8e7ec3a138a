//! Protocol constants for the service-node subsystem.
//!
//! These values are consensus-relevant: every peer must agree on them for
//! the registry and payment election to converge.

/// Current peer protocol version.
pub const PROTOCOL_VERSION: u32 = 90025;

/// Minimum protocol accepted for payment participation (base rule).
pub const MIN_PAYMENT_PROTO_V1: u32 = 90023;

/// Minimum protocol when the pay-updated-nodes feature flag is active.
pub const MIN_PAYMENT_PROTO_V2: u32 = 90024;

/// Minimum protocol for proof-of-service participation.
pub const MIN_POSE_PROTO: u32 = 90023;

/// Per-node lifecycle checks run at most this often unless forced.
pub const CHECK_SECONDS: i64 = 5;

/// A fresh announce for a known node is only applied this long after the
/// previous one (except for our own node).
pub const MIN_ANNOUNCE_SECONDS: i64 = 5 * 60;

/// Heart-beat cadence; also the pre-enable window.
pub const MIN_PING_SECONDS: i64 = 10 * 60;

/// A node with no ping for this long is expired.
pub const EXPIRATION_SECONDS: i64 = 65 * 60;

/// Watchdog votes older than this expire the node when the watchdog is active.
pub const WATCHDOG_MAX_SECONDS: i64 = 120 * 60;

/// A node silent for this long needs a brand new announce.
pub const NEW_START_REQUIRED_SECONDS: i64 = 180 * 60;

/// PoSe ban score bound; reaching +MAX forces a ban.
pub const POSE_BAN_MAX_SCORE: i16 = 5;

/// Rate limit for peer-targeted list/entry requests.
pub const DSEG_UPDATE_SECONDS: i64 = 3 * 60 * 60;

/// Blocks scanned back per tip update when refreshing last-paid data.
pub const LAST_PAID_SCAN_BLOCKS: u32 = 100;

/// PoSe audit fan-out and participation bounds.
pub const MAX_POSE_CONNECTIONS: usize = 10;
pub const MAX_POSE_RANK: usize = 10;
pub const MAX_POSE_BLOCKS: u32 = 10;

/// Announce recovery quorum parameters.
pub const RECOVERY_QUORUM_TOTAL: usize = 10;
pub const RECOVERY_QUORUM_REQUIRED: usize = 6;
pub const RECOVERY_MAX_ASK_ENTRIES: usize = 10;
pub const RECOVERY_WAIT_SECONDS: i64 = 60;
pub const RECOVERY_RETRY_SECONDS: i64 = 3 * 60 * 60;

/// Payment vote quorum: signatures required for enforcement, and the size
/// of the eligible voter set.
pub const SIGNATURES_REQUIRED: usize = 6;
pub const SIGNATURES_TOTAL: usize = 10;

/// Vote history window: `max(|registry| × STORAGE_COEFF, MIN_BLOCKS_TO_STORE)`.
pub const STORAGE_COEFF: f64 = 1.25;
pub const MIN_BLOCKS_TO_STORE: u32 = 5000;

/// Messages time-stamped further into the future than this are invalid.
pub const FUTURE_DRIFT_SECONDS: i64 = 3600;

/// A ping references the block at `tip - PING_CHAIN_DEPTH` ...
pub const PING_CHAIN_DEPTH: u32 = 12;
/// ... and is rejected when that block is older than `tip - PING_MAX_AGE_BLOCKS`.
pub const PING_MAX_AGE_BLOCKS: u32 = 24;

/// Votes are accepted for heights up to this far past the tip.
pub const VOTE_FUTURE_WINDOW: u32 = 20;

/// Ranking for height `h` is computed against the block hash at `h - RANK_HASH_DEPTH`.
pub const RANK_HASH_DEPTH: u32 = 101;

/// A node already elected within this many future blocks is skipped.
pub const SCHEDULED_LOOKAHEAD: u32 = 8;

/// Votes nominate the winner for `tip + VOTE_LEAD_BLOCKS`.
pub const VOTE_LEAD_BLOCKS: u32 = 5;

/// Maximum inventory entries per get-data message.
pub const MAX_INV: usize = 50_000;

/// Service-node share of the coinbase value, in percent.
pub const PAYMENT_PERCENT: u64 = 30;
