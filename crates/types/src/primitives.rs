use serde::{Deserialize, Serialize};
use std::fmt;

/// Replica identifier; dense, assigned by position in the replica table.
pub type ReplicaId = u16;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub const fn zero() -> Self {
        H256([0u8; 32])
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != 32 {
            return Err("invalid length");
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(H256(arr))
    }

    /// Parse from the 64-char lowercase hex form used by the Merkle layer.
    pub fn from_hex(s: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(s).map_err(|_| "invalid hex")?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0[..8]))
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        PublicKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PubKey({})", hex::encode(&self.0))
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Sig({})", hex::encode(&self.0))
    }
}

/// Commit notification for a single command inside a committed block.
///
/// `status` is 1 for a decided command; 0 answers a duplicate submission of
/// a command hash that is still pending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finality {
    pub replica: ReplicaId,
    pub status: u8,
    pub seq: u64,
    pub height: u64,
    pub cmd_hash: H256,
    pub blk_hash: H256,
}

impl fmt::Display for Finality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<fin rid={} status={} seq={} height={} cmd={} blk={}>",
            self.replica, self.status, self.seq, self.height, self.cmd_hash, self.blk_hash
        )
    }
}
