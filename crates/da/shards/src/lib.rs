// ============================================================================
// ARBOR SHARDS - Slice Wire Format and Shard Mailbox
// ============================================================================
// PURPOSE: Carry one Merkle-authenticated shard per network message and
// accumulate validated shards per block until the recovery threshold
// k = n - f is reached.
//
// SLICE WIRE FORMAT:
//   block_hash(32) || index(u32 LE) || root_hash(64 ASCII hex)
//   || branch_len(u32 LE) || branch[branch_len](64 ASCII hex each)
//   || data_len(u32 LE) || data[data_len]
//
// The root hash travels in its hex-string form; it equals the proposing
// block's cmd_hash.
// ============================================================================

mod container;
mod slice;

pub use container::{ShardError, ShardsContainer};
pub use slice::Slice;
