// ============================================================================
// ARBOR MERKLE - Shard Authentication Tree
// ============================================================================
// PURPOSE: Authenticate each erasure-coded shard against a single root so a
// replica can verify the one shard its proposal carries.
//
// HASHING RULE (wire compatibility):
// - Leaf: lowercase hex of SHA-256 over the shard bytes
// - Internal node: SHA-256 over the concatenated ASCII hex of the children
// - Odd levels are padded with EMPTY_HASH (64 ASCII zeros)
// Hashes travel as 64-char lowercase hex strings at every level.
// ============================================================================

mod tree;

pub use tree::{sha256_hex, MerkleProof, MerkleTree, EMPTY_HASH};
