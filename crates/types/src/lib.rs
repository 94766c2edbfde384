// ============================================================================
// ARBOR TYPES - Shared Primitive Types
// ============================================================================
// PURPOSE: Hashes, replica identities and the commit-callback payload used
// across the consensus and dissemination crates
//
// OUTPUTS:
// - H256 → content addressing for blocks, commands, certificates
// - ReplicaConfig → replica table with the quorum threshold n - f
// - Finality → per-command commit notification surfaced to clients
// ============================================================================

pub mod primitives;
pub mod replica;
pub mod wire;

pub use primitives::{Finality, PublicKey, ReplicaId, Signature, H256};
pub use replica::{ReplicaConfig, ReplicaInfo};
pub use wire::{WireError, WireReader, WireWriter};
