use crate::block::Block;
use arbor_types::H256;
use std::collections::HashMap;
use tracing::debug;

/// Content-addressed block cache with reference-counted lifetime.
///
/// Blocks reference their parents and justified block by hash; every other
/// component resolves those hashes through this store. An entry holds one
/// base reference from insertion plus one per resolved incoming link
/// (`retain` on delivery for each parent and justify edge). `prune`
/// detaches links with matching releases, so a block is evicted exactly
/// when nothing points at it anymore.
pub struct EntityStorage {
    blocks: HashMap<H256, StoredBlock>,
}

struct StoredBlock {
    blk: Block,
    rc: usize,
}

impl EntityStorage {
    pub fn new() -> Self {
        EntityStorage {
            blocks: HashMap::new(),
        }
    }

    /// Insert a block with its base reference, keeping the existing entry
    /// on hash collision. Returns the block hash either way.
    pub fn add_blk(&mut self, blk: Block) -> H256 {
        let hash = blk.hash();
        self.blocks
            .entry(hash)
            .or_insert(StoredBlock { blk, rc: 1 });
        hash
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn find(&self, hash: &H256) -> Option<&Block> {
        self.blocks.get(hash).map(|s| &s.blk)
    }

    pub fn find_mut(&mut self, hash: &H256) -> Option<&mut Block> {
        self.blocks.get_mut(hash).map(|s| &mut s.blk)
    }

    pub fn is_delivered(&self, hash: &H256) -> bool {
        self.find(hash).map(|b| b.delivered).unwrap_or(false)
    }

    /// Count one more incoming link to an entry.
    pub fn retain(&mut self, hash: &H256) {
        if let Some(s) = self.blocks.get_mut(hash) {
            s.rc += 1;
        }
    }

    /// Drop one reference; the entry is removed when the count reaches zero.
    /// Returns true when the block was evicted.
    pub fn try_release(&mut self, hash: &H256) -> bool {
        if let Some(s) = self.blocks.get_mut(hash) {
            s.rc -= 1;
            if s.rc == 0 {
                self.blocks.remove(hash);
                debug!("released blk {}", hash);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for EntityStorage {
    fn default() -> Self {
        Self::new()
    }
}
