//! Command batches: canonical serialization, erasure encoding and the
//! Merkle tree binding a batch to its root.

use crate::ConsensusError;
use arbor_da_erasure::ErasureCoder;
use arbor_da_merkle::{MerkleProof, MerkleTree};
use arbor_types::{WireReader, WireWriter, H256};

/// Canonical byte form of a command batch: u32 LE count followed by the
/// 32-byte command hashes in order.
pub fn serialize_cmds(cmds: &[H256]) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.put_u32(cmds.len() as u32);
    for cmd in cmds {
        w.put_hash(cmd);
    }
    w.into_vec()
}

pub fn parse_cmds(bytes: &[u8]) -> Result<Vec<H256>, ConsensusError> {
    let mut r = WireReader::new(bytes);
    let count = r.read_u32().map_err(|_| ConsensusError::BadBatch)? as usize;
    let mut cmds = Vec::with_capacity(count);
    for _ in 0..count {
        cmds.push(r.read_hash().map_err(|_| ConsensusError::BadBatch)?);
    }
    r.finish().map_err(|_| ConsensusError::BadBatch)?;
    Ok(cmds)
}

/// A fully encoded batch, ready for the next propose beat: the commands,
/// the Merkle root that becomes the block's `cmd_hash`, and one inclusion
/// proof per replica. Produced off the event loop.
#[derive(Clone, Debug)]
pub struct NewBlk {
    pub cmds: Vec<H256>,
    pub root: H256,
    pub proofs: Vec<MerkleProof>,
}

impl NewBlk {
    pub fn build(coder: &ErasureCoder, cmds: Vec<H256>) -> Result<Self, ConsensusError> {
        let payload = serialize_cmds(&cmds);
        let shards = coder.encode(&payload)?;
        let tree = MerkleTree::build(shards);
        let root = H256::from_hex(tree.root_hash()).map_err(|_| ConsensusError::BadBatch)?;
        Ok(NewBlk {
            cmds,
            root,
            proofs: tree.proofs(),
        })
    }
}
