use arbor_crypto::{sha256_h256, QuorumCert};
use arbor_types::{ReplicaId, WireError, WireReader, WireWriter, H256};
use std::collections::HashSet;
use std::fmt;

/// A proposed block.
///
/// The wire identity of a block is (parents, cmd_hash, qc, extra); its hash
/// is computed over that encoding once at construction. Everything else is
/// replica-local state filled in by delivery, voting and commit.
#[derive(Clone, Debug)]
pub struct Block {
    pub parent_hashes: Vec<H256>,
    pub cmd_hash: H256,
    pub qc: Option<QuorumCert>,
    pub extra: Vec<u8>,

    hash: H256,
    pub height: u64,
    pub delivered: bool,
    pub decision: u8,
    pub voted: HashSet<ReplicaId>,
    pub self_qc: Option<QuorumCert>,
    pub qc_ref: Option<H256>,
}

impl Block {
    pub fn new(
        parent_hashes: Vec<H256>,
        cmd_hash: H256,
        qc: Option<QuorumCert>,
        extra: Vec<u8>,
    ) -> Self {
        let hash = Self::compute_hash(&parent_hashes, &cmd_hash, &qc, &extra);
        Block {
            parent_hashes,
            cmd_hash,
            qc,
            extra,
            hash,
            height: 0,
            delivered: false,
            decision: 0,
            voted: HashSet::new(),
            self_qc: None,
            qc_ref: None,
        }
    }

    /// The genesis block: height 1, no parents, delivered and decided from
    /// birth. Its self-referential certificate is wired up by core
    /// initialization.
    pub fn genesis() -> Self {
        let mut blk = Block::new(Vec::new(), H256::zero(), None, Vec::new());
        blk.height = 1;
        blk.delivered = true;
        blk.decision = 1;
        blk
    }

    pub fn hash(&self) -> H256 {
        self.hash
    }

    fn compute_hash(
        parents: &[H256],
        cmd_hash: &H256,
        qc: &Option<QuorumCert>,
        extra: &[u8],
    ) -> H256 {
        let mut w = WireWriter::new();
        encode_fields(&mut w, parents, cmd_hash, qc, extra);
        sha256_h256(&w.into_vec())
    }

    pub fn encode(&self, w: &mut WireWriter) {
        encode_fields(w, &self.parent_hashes, &self.cmd_hash, &self.qc, &self.extra);
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, WireError> {
        let nparents = r.read_u32()? as usize;
        let mut parent_hashes = Vec::with_capacity(nparents);
        for _ in 0..nparents {
            parent_hashes.push(r.read_hash()?);
        }
        let cmd_hash = r.read_hash()?;
        let qc = match r.read_u8()? {
            0 => None,
            1 => Some(QuorumCert::decode(r)?),
            _ => return Err(WireError::Invalid("qc presence flag")),
        };
        let extra = r.read_bytes()?;
        Ok(Block::new(parent_hashes, cmd_hash, qc, extra))
    }
}

fn encode_fields(
    w: &mut WireWriter,
    parents: &[H256],
    cmd_hash: &H256,
    qc: &Option<QuorumCert>,
    extra: &[u8],
) {
    w.put_u32(parents.len() as u32);
    for p in parents {
        w.put_hash(p);
    }
    w.put_hash(cmd_hash);
    match qc {
        Some(qc) => {
            w.put_u8(1);
            qc.encode(w);
        }
        None => w.put_u8(0),
    }
    w.put_bytes(extra);
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<blk hash={} height={} parents={} decision={}>",
            self.hash,
            self.height,
            self.parent_hashes.len(),
            self.decision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_over_wire() {
        let blk = Block::new(vec![H256([1; 32])], H256([2; 32]), None, b"extra".to_vec());
        let mut w = WireWriter::new();
        blk.encode(&mut w);
        let buf = w.into_vec();
        let mut r = WireReader::new(&buf);
        let decoded = Block::decode(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(decoded.hash(), blk.hash());
        assert_eq!(decoded.parent_hashes, blk.parent_hashes);
        assert_eq!(decoded.cmd_hash, blk.cmd_hash);
    }

    #[test]
    fn hash_binds_every_field() {
        let base = Block::new(vec![H256([1; 32])], H256([2; 32]), None, vec![]);
        let other_parent = Block::new(vec![H256([3; 32])], H256([2; 32]), None, vec![]);
        let other_cmds = Block::new(vec![H256([1; 32])], H256([9; 32]), None, vec![]);
        let other_extra = Block::new(vec![H256([1; 32])], H256([2; 32]), None, b"x".to_vec());
        assert_ne!(base.hash(), other_parent.hash());
        assert_ne!(base.hash(), other_cmds.hash());
        assert_ne!(base.hash(), other_extra.hash());
    }

    #[test]
    fn genesis_shape() {
        let g = Block::genesis();
        assert_eq!(g.height, 1);
        assert!(g.delivered);
        assert_eq!(g.decision, 1);
        assert!(g.parent_hashes.is_empty());
    }
}
