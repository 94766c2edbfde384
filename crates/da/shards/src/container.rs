use arbor_types::H256;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShardError {
    #[error("bucket for block already exists")]
    BlockExists,
    #[error("no bucket for block")]
    UnknownBlock,
    #[error("shard index out of range")]
    BadIndex,
    #[error("shard already accepted at this index")]
    DuplicateShard,
    #[error("below recovery threshold")]
    Insufficient,
}

/// Per-block mailbox for validated shards.
///
/// Callers validate slices before insertion; the container only tracks
/// occupancy. A bucket holds one optional shard per replica and a count of
/// accepted shards; `get_block` releases a copy once the count reaches the
/// threshold k = n - f. Buckets are removed when their block commits.
pub struct ShardsContainer {
    buckets: HashMap<H256, Bucket>,
    node_num: usize,
    threshold: usize,
}

struct Bucket {
    shards: Vec<Option<Vec<u8>>>,
    count: usize,
}

impl ShardsContainer {
    pub fn new(node_num: usize) -> Self {
        ShardsContainer {
            buckets: HashMap::new(),
            node_num,
            threshold: node_num - node_num.saturating_sub(1) / 3,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn node_num(&self) -> usize {
        self.node_num
    }

    /// Pre-create an empty bucket; fails if one exists.
    pub fn new_block(&mut self, hash: H256) -> Result<(), ShardError> {
        if self.buckets.contains_key(&hash) {
            return Err(ShardError::BlockExists);
        }
        self.buckets.insert(
            hash,
            Bucket {
                shards: vec![None; self.node_num],
                count: 0,
            },
        );
        Ok(())
    }

    /// Accept a shard; the bucket is created on first touch. Duplicate
    /// indices are rejected.
    pub fn insert_shard(&mut self, hash: H256, idx: u32, data: Vec<u8>) -> Result<(), ShardError> {
        let idx = idx as usize;
        if idx >= self.node_num {
            return Err(ShardError::BadIndex);
        }
        let bucket = self
            .buckets
            .entry(hash)
            .or_insert_with(|| Bucket {
                shards: vec![None; self.node_num],
                count: 0,
            });
        if bucket.shards[idx].is_some() {
            return Err(ShardError::DuplicateShard);
        }
        bucket.shards[idx] = Some(data);
        bucket.count += 1;
        Ok(())
    }

    pub fn enough(&self, hash: &H256) -> bool {
        self.buckets
            .get(hash)
            .map(|b| b.count >= self.threshold)
            .unwrap_or(false)
    }

    /// Copy out the shard array once the threshold is reached.
    pub fn get_block(&self, hash: &H256) -> Result<Vec<Option<Vec<u8>>>, ShardError> {
        let bucket = self.buckets.get(hash).ok_or(ShardError::UnknownBlock)?;
        if bucket.count < self.threshold {
            return Err(ShardError::Insufficient);
        }
        Ok(bucket.shards.clone())
    }

    pub fn remove(&mut self, hash: &H256) -> Result<(), ShardError> {
        self.buckets
            .remove(hash)
            .map(|_| ())
            .ok_or(ShardError::UnknownBlock)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
