//! Opcode-framed protocol messages.
//!
//! Every frame is `opcode(u8) || payload_len(u32 LE) || payload`. Slice
//! frames additionally prefix a content hash over the slice bytes, checked
//! on receipt before the Merkle proof is even looked at.

use arbor_consensus::{Block, Proposal, Vote};
use arbor_crypto::sha256_h256;
use arbor_da_shards::Slice;
use arbor_types::{WireError, WireReader, WireWriter, H256};

pub const OPCODE_PROPOSE: u8 = 0x00;
pub const OPCODE_VOTE: u8 = 0x01;
pub const OPCODE_REQ_BLOCK: u8 = 0x02;
pub const OPCODE_RESP_BLOCK: u8 = 0x03;
pub const OPCODE_SLICE: u8 = 0x04;

#[derive(Clone, Debug)]
pub enum Message {
    Propose(Proposal),
    Vote(Vote),
    ReqBlock(Vec<H256>),
    RespBlock(Vec<Block>),
    Slice { hash: H256, slice: Slice },
}

impl Message {
    /// Wrap a slice with its content hash.
    pub fn slice(slice: Slice) -> Self {
        let hash = sha256_h256(&slice.to_bytes());
        Message::Slice { hash, slice }
    }

    fn opcode(&self) -> u8 {
        match self {
            Message::Propose(_) => OPCODE_PROPOSE,
            Message::Vote(_) => OPCODE_VOTE,
            Message::ReqBlock(_) => OPCODE_REQ_BLOCK,
            Message::RespBlock(_) => OPCODE_RESP_BLOCK,
            Message::Slice { .. } => OPCODE_SLICE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = WireWriter::new();
        match self {
            Message::Propose(prop) => prop.encode(&mut payload),
            Message::Vote(vote) => vote.encode(&mut payload),
            Message::ReqBlock(hashes) => {
                payload.put_u32(hashes.len() as u32);
                for h in hashes {
                    payload.put_hash(h);
                }
            }
            Message::RespBlock(blocks) => {
                payload.put_u32(blocks.len() as u32);
                for blk in blocks {
                    blk.encode(&mut payload);
                }
            }
            Message::Slice { hash, slice } => {
                payload.put_hash(hash);
                slice.encode(&mut payload);
            }
        }
        let payload = payload.into_vec();

        let mut frame = WireWriter::new();
        frame.put_u8(self.opcode());
        frame.put_bytes(&payload);
        frame.into_vec()
    }

    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(frame);
        let opcode = r.read_u8()?;
        let payload = r.read_bytes()?;
        r.finish()?;

        let mut r = WireReader::new(&payload);
        let msg = match opcode {
            OPCODE_PROPOSE => Message::Propose(Proposal::decode(&mut r)?),
            OPCODE_VOTE => Message::Vote(Vote::decode(&mut r)?),
            OPCODE_REQ_BLOCK => {
                let count = r.read_u32()? as usize;
                let mut hashes = Vec::with_capacity(count);
                for _ in 0..count {
                    hashes.push(r.read_hash()?);
                }
                Message::ReqBlock(hashes)
            }
            OPCODE_RESP_BLOCK => {
                let count = r.read_u32()? as usize;
                let mut blocks = Vec::with_capacity(count);
                for _ in 0..count {
                    blocks.push(Block::decode(&mut r)?);
                }
                Message::RespBlock(blocks)
            }
            OPCODE_SLICE => {
                let hash = r.read_hash()?;
                let slice = Slice::decode(&mut r)?;
                Message::Slice { hash, slice }
            }
            _ => return Err(WireError::Invalid("unknown opcode")),
        };
        r.finish()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_da_erasure::{init, ErasureCoder};
    use arbor_da_merkle::MerkleTree;

    fn sample_slice() -> Slice {
        init().unwrap();
        let coder = ErasureCoder::from_replicas(4).unwrap();
        let shards = coder.encode(b"payload bytes").unwrap();
        let tree = MerkleTree::build(shards);
        Slice::from_proof(tree.proof(1), H256([2; 32]))
    }

    #[test]
    fn slice_frame_roundtrip() {
        let msg = Message::slice(sample_slice());
        let frame = msg.encode();
        match Message::decode(&frame).unwrap() {
            Message::Slice { hash, slice } => {
                assert_eq!(hash, sha256_h256(&slice.to_bytes()));
                assert!(slice.validate());
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn req_block_roundtrip() {
        let msg = Message::ReqBlock(vec![H256([1; 32]), H256([2; 32])]);
        let frame = msg.encode();
        match Message::decode(&frame).unwrap() {
            Message::ReqBlock(hashes) => assert_eq!(hashes.len(), 2),
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn resp_block_preserves_hashes() {
        let blk = Block::new(vec![H256([7; 32])], H256([8; 32]), None, vec![1, 2, 3]);
        let want = blk.hash();
        let frame = Message::RespBlock(vec![blk]).encode();
        match Message::decode(&frame).unwrap() {
            Message::RespBlock(blocks) => assert_eq!(blocks[0].hash(), want),
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn truncated_frame_rejected() {
        let mut frame = Message::ReqBlock(vec![H256([1; 32])]).encode();
        frame.truncate(frame.len() - 4);
        assert!(Message::decode(&frame).is_err());
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut frame = Message::ReqBlock(vec![]).encode();
        frame[0] = 0x7f;
        assert!(Message::decode(&frame).is_err());
    }
}
