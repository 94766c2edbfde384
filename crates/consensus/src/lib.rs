// ============================================================================
// ARBOR CONSENSUS - HotStuff Core
// ============================================================================
// PURPOSE: The safety/liveness state machine: block delivery, quorum
// certificate formation, highest-QC tracking, the two-/three-chain commit
// pipeline and the voting rule, coupled with the erasure-coded payload
// recovery that gates command reporting at commit time.
//
// COMPONENT CONNECTIONS:
// ┌──────────────────────────────────────────────────────────────────┐
// │                    HOTSTUFF CORE                                  │
// ├──────────────────────────────────────────────────────────────────┤
// │  Proposal  →  deliver block  →  update (chain rules)  →  vote    │
// │  Vote      →  accumulate partials  →  QC  →  hqc advance         │
// │  Slice     →  validate proof  →  shard mailbox                   │
// │  2-chain   →  decode mailbox off the event loop                  │
// │  3-chain   →  commit queue  →  Decided effects  →  Finality      │
// └──────────────────────────────────────────────────────────────────┘
//
// The core is a sans-IO state machine: every handler runs to completion on
// the caller's single event-loop task and pushes outbound actions onto an
// effect queue the caller drains.
// ============================================================================

pub mod batch;
pub mod block;
pub mod core;
pub mod pacemaker;
pub mod storage;

pub use crate::core::{DecidedBlock, DecodeJob, Effect, HotStuffCore, Proposal, Vote};
pub use batch::{parse_cmds, serialize_cmds, NewBlk};
pub use block::Block;
pub use pacemaker::{FixedPacemaker, Pacemaker, RoundRobinPacemaker};
pub use storage::EntityStorage;

use arbor_da_erasure::ErasureError;
use arbor_da_shards::ShardError;
use arbor_types::H256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("block {0} not delivered")]
    NotDelivered(H256),
    #[error("block referred by qc not fetched: {0}")]
    MissingJustify(H256),
    #[error("proposal carries no parents")]
    EmptyParents,
    #[error("safety breached: {0}")]
    SafetyViolation(String),
    #[error("erasure coding: {0}")]
    Erasure(#[from] ErasureError),
    #[error("shard container: {0}")]
    Shards(#[from] ShardError),
    #[error("malformed command batch")]
    BadBatch,
}
