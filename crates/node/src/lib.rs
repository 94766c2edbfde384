// ============================================================================
// ARBOR NODE - Replica Event Loop and Transport Integration
// ============================================================================
// PURPOSE: Glue the HotStuff core to a network: message framing, fetch and
// delivery machinery for missing ancestors, the leader's propose pipeline
// and the single event-loop task that owns all consensus state.
//
// MESSAGE FLOW:
// 1. Frames arrive from the network fabric → opcode dispatch
// 2. Signature/certificate checks run on the blocking pool
// 3. Blocks park until their ancestors are delivered (fetched on demand)
// 4. Core handlers run to completion and emit effects
// 5. Effects fan back out as sends, broadcasts and commit notifications
// ============================================================================

pub mod base;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod network;
pub mod stats;

pub use base::{CommitEvent, HotStuffBase, NodeOptions, ReplicaHandle};
pub use cluster::{Cluster, ClusterOptions};
pub use codec::Message;
pub use config::{NodeConfig, ReplicaEntry};
pub use network::{MemoryHub, MemoryNetwork, Network};
