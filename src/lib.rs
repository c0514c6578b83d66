use static_assertions::const_assert;
use std::time::Duration;

pub mod block;
pub mod crypto;
pub mod ledger;
pub mod manager;
pub mod miner;
pub mod network;
pub mod tracker;
pub mod user;

pub type BlockHash = [u8; 32];
pub type PublicKeyBytes = [u8; 32];

/// `prev_hash` of the genesis block.
pub const GENESIS_PREV_HASH: BlockHash = [0u8; 32];

/// Number of leading zero bits required of a header hash.
pub const TARGET: usize = 20;
/// Maximum number of pool posts included in a mined block.
pub const POSTS_PER_BLOCK: usize = 2;
/// Nonces tried per mining attempt before yielding back to the loop.
pub const MINING_ITERATIONS: usize = 10_000;

// Per-miner intervals are drawn once from these ranges so that miners
// do not heartbeat or sync in lockstep.
pub const HEARTBEAT_MIN_MS: u64 = 200;
pub const HEARTBEAT_MAX_MS: u64 = 400;
pub const SYNC_MIN_MS: u64 = 300;
pub const SYNC_MAX_MS: u64 = 600;

/// A tracker entry expires after this long without a heartbeat.
pub const TRACKER_ENTRY_TIMEOUT: Duration = Duration::from_millis(500);

/// Bound on draining in-flight handlers at shutdown.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

// Assertions about acceptable values for above parameters:
// The target must fit in the hash output
const_assert!(TARGET <= 256);
// A mined block must carry at least one post
const_assert!(POSTS_PER_BLOCK >= 1);
// Interval ranges must be non-empty
const_assert!(HEARTBEAT_MIN_MS < HEARTBEAT_MAX_MS);
const_assert!(SYNC_MIN_MS < SYNC_MAX_MS);
// An entry must outlive the longest heartbeat interval or miners flap
const_assert!(TRACKER_ENTRY_TIMEOUT.as_millis() as u64 > HEARTBEAT_MAX_MS);
