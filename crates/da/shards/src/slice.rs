use arbor_da_merkle::MerkleProof;
use arbor_types::{WireError, WireReader, WireWriter, H256};
use std::fmt;

const HEX_LEN: usize = 64;

/// One erasure-coded shard in transit, bound to a block and carrying its
/// Merkle inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slice {
    pub blk_hash: H256,
    pub index: u32,
    pub root_hash: String,
    pub branch: Vec<String>,
    pub data: Vec<u8>,
}

impl Slice {
    pub fn from_proof(proof: MerkleProof, blk_hash: H256) -> Self {
        Slice {
            blk_hash,
            index: proof.index,
            root_hash: proof.root_hash,
            branch: proof.branch,
            data: proof.data,
        }
    }

    /// Recompute the root from the shard bytes and branch; true iff it
    /// matches the embedded root hash.
    pub fn validate(&self) -> bool {
        let proof = MerkleProof {
            data: self.data.clone(),
            index: self.index,
            root_hash: self.root_hash.clone(),
            branch: self.branch.clone(),
        };
        proof.validate()
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.put_hash(&self.blk_hash);
        w.put_u32(self.index);
        w.put_raw(self.root_hash.as_bytes());
        w.put_u32(self.branch.len() as u32);
        for sibling in &self.branch {
            w.put_raw(sibling.as_bytes());
        }
        w.put_bytes(&self.data);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode(&mut w);
        w.into_vec()
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, WireError> {
        let blk_hash = r.read_hash()?;
        let index = r.read_u32()?;
        let root_hash = read_hex(r)?;
        let branch_len = r.read_u32()? as usize;
        let mut branch = Vec::with_capacity(branch_len);
        for _ in 0..branch_len {
            branch.push(read_hex(r)?);
        }
        let data = r.read_bytes()?;
        Ok(Slice {
            blk_hash,
            index,
            root_hash,
            branch,
            data,
        })
    }
}

fn read_hex(r: &mut WireReader) -> Result<String, WireError> {
    let raw = r.read_raw(HEX_LEN)?;
    let s = std::str::from_utf8(raw).map_err(|_| WireError::Invalid("hash hex"))?;
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(WireError::Invalid("hash hex"));
    }
    Ok(s.to_string())
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<slice blk={} idx={} root={} len={}>",
            self.blk_hash,
            self.index,
            &self.root_hash[..8.min(self.root_hash.len())],
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_da_merkle::MerkleTree;

    fn sample_slice(n: usize, idx: usize) -> Slice {
        let shards: Vec<Vec<u8>> = (0..n).map(|i| vec![i as u8; 64]).collect();
        let tree = MerkleTree::build(shards);
        Slice::from_proof(tree.proof(idx), H256([0xaa; 32]))
    }

    #[test]
    fn validates_genuine_shard() {
        assert!(sample_slice(7, 3).validate());
    }

    #[test]
    fn rejects_mutated_byte() {
        let mut slice = sample_slice(7, 3);
        slice.data[10] ^= 0x80;
        assert!(!slice.validate());
    }

    #[test]
    fn wire_roundtrip() {
        let slice = sample_slice(5, 4);
        let bytes = slice.to_bytes();
        let mut r = WireReader::new(&bytes);
        let decoded = Slice::decode(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(decoded, slice);
        assert!(decoded.validate());
    }

    #[test]
    fn decode_rejects_non_hex_root() {
        let slice = sample_slice(4, 0);
        let mut bytes = slice.to_bytes();
        // root hash starts right after block hash + index
        bytes[36] = b'!';
        let mut r = WireReader::new(&bytes);
        assert!(Slice::decode(&mut r).is_err());
    }
}
