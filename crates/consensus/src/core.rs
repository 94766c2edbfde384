use crate::batch::{parse_cmds, NewBlk};
use crate::block::Block;
use crate::storage::EntityStorage;
use crate::ConsensusError;
use arbor_crypto::{sha256_h256, Keypair, PartCert, QuorumCert};
use arbor_da_erasure::{self as erasure, ErasureCoder};
use arbor_da_shards::{ShardError, ShardsContainer, Slice};
use arbor_types::{ReplicaConfig, ReplicaId, WireError, WireReader, WireWriter, H256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// In-flight payload recovery for one block, running on the blocking pool.
pub type DecodeJob = JoinHandle<Result<Vec<H256>, ConsensusError>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub voter: ReplicaId,
    pub blk_hash: H256,
    pub cert: PartCert,
}

impl Vote {
    pub fn encode(&self, w: &mut WireWriter) {
        w.put_u16(self.voter);
        w.put_hash(&self.blk_hash);
        self.cert.encode(w);
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, WireError> {
        let voter = r.read_u16()?;
        let blk_hash = r.read_hash()?;
        let cert = PartCert::decode(r)?;
        Ok(Vote {
            voter,
            blk_hash,
            cert,
        })
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<vote voter={} blk={}>", self.voter, self.blk_hash)
    }
}

/// A proposal addressed to one replica: the block plus that replica's slice,
/// with the slice content hash pinned so relays cannot swap shards.
#[derive(Clone, Debug)]
pub struct Proposal {
    pub proposer: ReplicaId,
    pub s_hash: H256,
    pub slice: Slice,
    pub blk: Block,
}

impl Proposal {
    pub fn new(proposer: ReplicaId, slice: Slice, blk: Block) -> Self {
        let s_hash = sha256_h256(&slice.to_bytes());
        Proposal {
            proposer,
            s_hash,
            slice,
            blk,
        }
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.put_u16(self.proposer);
        w.put_hash(&self.s_hash);
        self.slice.encode(w);
        self.blk.encode(w);
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, WireError> {
        let proposer = r.read_u16()?;
        let s_hash = r.read_hash()?;
        let slice = Slice::decode(r)?;
        let blk = Block::decode(r)?;
        Ok(Proposal {
            proposer,
            s_hash,
            slice,
            blk,
        })
    }
}

impl fmt::Display for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<prop proposer={} blk={} {}>",
            self.proposer,
            self.blk.hash(),
            self.slice
        )
    }
}

/// A block that reached a commit decision, together with its payload
/// recovery job (absent when the shard mailbox never filled).
#[derive(Debug)]
pub struct DecidedBlock {
    pub blk_hash: H256,
    pub height: u64,
    pub job: Option<DecodeJob>,
}

/// Outbound actions produced by the handlers; the owning event loop drains
/// these after every call into the core.
#[derive(Debug)]
pub enum Effect {
    /// Route a vote to the next proposer (`beat_resp` decides the target).
    SendVote {
        last_proposer: ReplicaId,
        vote: Vote,
    },
    /// One proposal per replica, indexed by replica id; the entry for this
    /// replica has already been self-received.
    BroadcastProposals(Vec<Proposal>),
    /// Re-broadcast a validated slice to all peers.
    BroadcastSlice(Slice),
    /// A block committed; payload recovery may still be in flight.
    Decided(DecidedBlock),
    /// A quorum certificate finished forming for this block.
    QcFinished(H256),
    /// The highest known QC advanced to this block.
    HqcUpdated(H256),
}

/// The HotStuff safety/liveness state machine.
///
/// All state mutation happens on the caller's event-loop task; CPU-bound
/// payload recovery is pushed to the blocking pool and re-enters through
/// the `DecidedBlock` job handles.
pub struct HotStuffCore {
    id: ReplicaId,
    config: ReplicaConfig,
    priv_key: Keypair,
    storage: EntityStorage,
    b0: H256,
    b_lock: H256,
    b_exec: H256,
    vheight: u64,
    hqc: (H256, QuorumCert),
    tails: HashSet<H256>,
    sc: ShardsContainer,
    coder: ErasureCoder,
    decode_jobs: HashMap<H256, DecodeJob>,
    two_chain: bool,
    vote_disabled: bool,
    effects: VecDeque<Effect>,
}

impl HotStuffCore {
    pub fn new(
        id: ReplicaId,
        priv_key: Keypair,
        config: ReplicaConfig,
        two_chain: bool,
    ) -> Result<Self, ConsensusError> {
        erasure::init()?;
        let coder = ErasureCoder::from_replicas(config.nreplicas())?;
        let sc = ShardsContainer::new(config.nreplicas());

        let mut genesis = Block::genesis();
        let b0 = genesis.hash();
        let mut qc0 = QuorumCert::new(b0);
        qc0.compute();
        genesis.qc = Some(qc0.clone());
        genesis.self_qc = Some(qc0.clone());
        genesis.qc_ref = Some(b0);
        genesis.voted = config.ids().collect();

        let mut storage = EntityStorage::new();
        storage.add_blk(genesis);
        // the self-referential justify link counts like any other
        storage.retain(&b0);

        info!("coder ready: k={} m={}", coder.original_count(), coder.recovery_count());

        Ok(HotStuffCore {
            id,
            config,
            priv_key,
            storage,
            b0,
            b_lock: b0,
            b_exec: b0,
            vheight: 0,
            hqc: (b0, qc0),
            tails: HashSet::from([b0]),
            sc,
            coder,
            decode_jobs: HashMap::new(),
            two_chain,
            vote_disabled: false,
            effects: VecDeque::new(),
        })
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn coder(&self) -> &ErasureCoder {
        &self.coder
    }

    pub fn genesis(&self) -> H256 {
        self.b0
    }

    pub fn b_lock(&self) -> H256 {
        self.b_lock
    }

    pub fn b_exec(&self) -> H256 {
        self.b_exec
    }

    pub fn vheight(&self) -> u64 {
        self.vheight
    }

    pub fn hqc_block(&self) -> H256 {
        self.hqc.0
    }

    pub fn storage(&self) -> &EntityStorage {
        &self.storage
    }

    pub fn set_vote_disabled(&mut self, disabled: bool) {
        self.vote_disabled = disabled;
    }

    /// Drain the outbound actions accumulated by handler calls.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        self.effects.drain(..).collect()
    }

    pub fn add_blk(&mut self, blk: Block) -> H256 {
        self.storage.add_blk(blk)
    }

    fn height_of(&self, hash: &H256) -> Option<u64> {
        self.storage.find(hash).map(|b| b.height)
    }

    fn parent0(&self, hash: &H256) -> Option<H256> {
        self.storage
            .find(hash)
            .and_then(|b| b.parent_hashes.first().copied())
    }

    fn qc_ref_of(&self, hash: &H256) -> Option<H256> {
        self.storage.find(hash).and_then(|b| b.qc_ref)
    }

    fn is_decided(&self, hash: &H256) -> bool {
        self.storage
            .find(hash)
            .map(|b| b.decision != 0)
            .unwrap_or(false)
    }

    /// Mark a resident block delivered once all of its parents are
    /// delivered and its justified block is resident. Idempotent.
    pub fn on_deliver_blk(&mut self, blk_hash: &H256) -> Result<bool, ConsensusError> {
        let (parents, qc_obj) = {
            let blk = self
                .storage
                .find(blk_hash)
                .ok_or(ConsensusError::NotDelivered(*blk_hash))?;
            if blk.delivered {
                warn!("attempt to deliver a block twice: {}", blk_hash);
                return Ok(false);
            }
            (
                blk.parent_hashes.clone(),
                blk.qc.as_ref().map(|qc| *qc.obj_hash()),
            )
        };

        if parents.is_empty() {
            return Err(ConsensusError::EmptyParents);
        }
        let mut height = 0;
        for (i, parent) in parents.iter().enumerate() {
            let pblk = self
                .storage
                .find(parent)
                .filter(|b| b.delivered)
                .ok_or(ConsensusError::NotDelivered(*parent))?;
            if i == 0 {
                height = pblk.height + 1;
            }
        }

        let qc_ref = match qc_obj {
            Some(justify) => {
                if !self.storage.contains(&justify) {
                    return Err(ConsensusError::MissingJustify(justify));
                }
                Some(justify)
            }
            None => None,
        };

        for parent in &parents {
            self.tails.remove(parent);
        }
        self.tails.insert(*blk_hash);

        // each resolved link keeps its target resident until prune
        // detaches it
        for parent in &parents {
            self.storage.retain(parent);
        }
        if let Some(justify) = qc_ref {
            self.storage.retain(&justify);
        }

        if let Some(blk) = self.storage.find_mut(blk_hash) {
            blk.height = height;
            blk.qc_ref = qc_ref;
            blk.delivered = true;
        }
        debug!("deliver {}", blk_hash);
        Ok(true)
    }

    fn update_hqc(&mut self, blk_hash: &H256, qc: &QuorumCert) {
        let new_height = match self.height_of(blk_hash) {
            Some(h) => h,
            None => return,
        };
        let cur_height = self.height_of(&self.hqc.0).unwrap_or(0);
        if new_height > cur_height {
            self.hqc = (*blk_hash, qc.clone());
            self.effects.push_back(Effect::HqcUpdated(*blk_hash));
        }
    }

    /// Launch payload recovery for a block whose shard mailbox filled; a
    /// warning is logged when the mailbox is still short of the threshold.
    fn maybe_start_decode(&mut self, blk_hash: &H256) {
        if self.is_decided(blk_hash) || self.decode_jobs.contains_key(blk_hash) {
            return;
        }
        if !self.sc.enough(blk_hash) {
            warn!("no sufficient slices for blk {}", blk_hash);
            return;
        }
        if let Ok(shards) = self.sc.get_block(blk_hash) {
            let coder = self.coder;
            let job = tokio::task::spawn_blocking(move || {
                let payload = coder.decode(&shards)?;
                parse_cmds(&payload)
            });
            self.decode_jobs.insert(*blk_hash, job);
        }
    }

    /// Chain-rule update driven by a newly arrived block's certificate.
    ///
    /// Three-chain (default): with b'' = nblk.qc_ref, b' = b''.qc_ref and
    /// b = b'.qc_ref, advance hqc at b'', kick decode and lock at b', and
    /// commit b when the three form a direct-parent chain. The two-chain
    /// variant drops the middle step.
    fn update(&mut self, nblk: &H256) -> Result<(), ConsensusError> {
        let nqc = match self.storage.find(nblk).and_then(|b| b.qc.clone()) {
            Some(qc) => qc,
            None => return Ok(()),
        };

        let blk = if self.two_chain {
            let blk1 = match self.qc_ref_of(nblk) {
                Some(h) if self.storage.contains(&h) => h,
                _ => return Ok(()),
            };
            if self.is_decided(&blk1) {
                return Ok(());
            }
            self.update_hqc(&blk1, &nqc);

            self.maybe_start_decode(&blk1);
            if self.height_of(&blk1).unwrap_or(0) > self.height_of(&self.b_lock).unwrap_or(0) {
                self.b_lock = blk1;
            }

            let blk = match self.qc_ref_of(&blk1) {
                Some(h) if self.storage.contains(&h) => h,
                _ => return Ok(()),
            };
            if self.is_decided(&blk) {
                return Ok(());
            }
            if self.parent0(&blk1) != Some(blk) {
                return Ok(());
            }
            blk
        } else {
            let blk2 = match self.qc_ref_of(nblk) {
                Some(h) if self.storage.contains(&h) => h,
                _ => return Ok(()),
            };
            // a decided block may be incomplete due to pruning
            if self.is_decided(&blk2) {
                return Ok(());
            }
            self.update_hqc(&blk2, &nqc);

            let blk1 = match self.qc_ref_of(&blk2) {
                Some(h) if self.storage.contains(&h) => h,
                _ => return Ok(()),
            };
            if self.is_decided(&blk1) {
                return Ok(());
            }

            self.maybe_start_decode(&blk1);
            if self.height_of(&blk1).unwrap_or(0) > self.height_of(&self.b_lock).unwrap_or(0) {
                self.b_lock = blk1;
            }

            let blk = match self.qc_ref_of(&blk1) {
                Some(h) if self.storage.contains(&h) => h,
                _ => return Ok(()),
            };
            if self.is_decided(&blk) {
                return Ok(());
            }

            // commit requires a direct-parent chain
            if self.parent0(&blk2) != Some(blk1) || self.parent0(&blk1) != Some(blk) {
                return Ok(());
            }
            blk
        };

        self.commit(blk)
    }

    /// Walk from the newly committable block down to b_exec and commit in
    /// height order. A walk that misses b_exec is a fatal safety breach.
    fn commit(&mut self, blk: H256) -> Result<(), ConsensusError> {
        let exec_height = self
            .height_of(&self.b_exec)
            .ok_or_else(|| ConsensusError::SafetyViolation("b_exec missing from storage".into()))?;

        let mut commit_queue = Vec::new();
        let mut cursor = blk;
        while self.height_of(&cursor).unwrap_or(0) > exec_height {
            commit_queue.push(cursor);
            cursor = match self.parent0(&cursor) {
                Some(parent) => parent,
                None => {
                    return Err(ConsensusError::SafetyViolation(format!(
                        "commit walk from {} fell off the chain",
                        blk
                    )))
                }
            };
        }
        if cursor != self.b_exec {
            return Err(ConsensusError::SafetyViolation(format!(
                "commit walk from {} ended at {} instead of b_exec {}",
                blk, cursor, self.b_exec
            )));
        }

        for blk_hash in commit_queue.into_iter().rev() {
            let height = self.height_of(&blk_hash).unwrap_or(0);
            // shards may have completed after the chain-rule kick
            if !self.decode_jobs.contains_key(&blk_hash) && self.sc.enough(&blk_hash) {
                self.maybe_start_decode(&blk_hash);
            }
            if let Some(b) = self.storage.find_mut(&blk_hash) {
                b.decision = 1;
            }
            let job = self.decode_jobs.remove(&blk_hash);
            if job.is_some() {
                info!("commit {} height {}", blk_hash, height);
            } else {
                warn!("cannot find blk {} from cmds_db", blk_hash);
            }
            let _ = self.sc.remove(&blk_hash);
            self.effects.push_back(Effect::Decided(DecidedBlock {
                blk_hash,
                height,
                job,
            }));
        }
        self.b_exec = blk;
        Ok(())
    }

    /// Leader path: turn an encoded batch into a block extending `parents`,
    /// self-deliver it, and emit per-replica proposals each carrying one
    /// distinct slice.
    pub fn on_propose(
        &mut self,
        batch: NewBlk,
        parents: Vec<H256>,
        extra: Vec<u8>,
    ) -> Result<H256, ConsensusError> {
        if parents.is_empty() {
            return Err(ConsensusError::EmptyParents);
        }
        if batch.proofs.len() != self.config.nreplicas() {
            return Err(ConsensusError::BadBatch);
        }

        let blk = Block::new(parents, batch.root, Some(self.hqc.1.clone()), extra);
        let bnew_hash = self.storage.add_blk(blk);
        if let Some(b) = self.storage.find_mut(&bnew_hash) {
            b.self_qc = Some(QuorumCert::new(bnew_hash));
        }

        self.on_deliver_blk(&bnew_hash)?;
        self.update(&bnew_hash)?;

        let height = self
            .height_of(&bnew_hash)
            .ok_or(ConsensusError::NotDelivered(bnew_hash))?;
        if height <= self.vheight {
            return Err(ConsensusError::SafetyViolation(
                "new block must be higher than vheight".into(),
            ));
        }

        let blk_wire = self
            .storage
            .find(&bnew_hash)
            .cloned()
            .ok_or(ConsensusError::NotDelivered(bnew_hash))?;
        let props: Vec<Proposal> = batch
            .proofs
            .into_iter()
            .map(|proof| {
                let slice = Slice::from_proof(proof, bnew_hash);
                Proposal::new(self.id, slice, blk_wire.clone())
            })
            .collect();

        info!("propose {} height {}", bnew_hash, height);
        let own = props[self.id as usize].clone();
        self.effects.push_back(Effect::BroadcastProposals(props));
        // self-receive; no need to go through the network
        self.on_receive_proposal(own)?;
        Ok(bnew_hash)
    }

    /// Follower path. The caller has already made the carried block
    /// resident and delivered (fetching ancestors as needed).
    pub fn on_receive_proposal(&mut self, prop: Proposal) -> Result<(), ConsensusError> {
        debug!("got {}", prop);
        let bnew_hash = prop.blk.hash();

        if prop.s_hash != sha256_h256(&prop.slice.to_bytes()) {
            warn!("slice hash mismatch in proposal from {}", prop.proposer);
            return Ok(());
        }
        if !prop.slice.validate() {
            warn!("invalid slice in proposal from {}", prop.proposer);
            return Ok(());
        }
        if prop.slice.blk_hash != bnew_hash
            || prop.slice.root_hash != prop.blk.cmd_hash.to_hex()
        {
            warn!("slice not bound to proposed block from {}", prop.proposer);
            return Ok(());
        }

        self.on_receive_slice(prop.slice.clone());
        self.effects.push_back(Effect::BroadcastSlice(prop.slice.clone()));

        let self_prop = prop.proposer == self.id;
        if !self_prop {
            if !self.storage.is_delivered(&bnew_hash) {
                return Err(ConsensusError::NotDelivered(bnew_hash));
            }
            self.update(&bnew_hash)?;
        }

        let (bnew_height, qc_ref) = match self.storage.find(&bnew_hash) {
            Some(b) => (b.height, b.qc_ref),
            None => return Err(ConsensusError::NotDelivered(bnew_hash)),
        };

        let mut opinion = false;
        if bnew_height > self.vheight {
            let lock_height = self.height_of(&self.b_lock).unwrap_or(0);
            let qc_ref_height = qc_ref.and_then(|h| self.height_of(&h)).unwrap_or(0);
            if qc_ref.is_some() && qc_ref_height > lock_height {
                // liveness: the justified block is past our lock
                opinion = true;
            } else {
                // safety: the proposal extends the locked branch
                let mut cursor = bnew_hash;
                while self.height_of(&cursor).unwrap_or(0) > lock_height {
                    match self.parent0(&cursor) {
                        Some(parent) => cursor = parent,
                        None => break,
                    }
                }
                if cursor == self.b_lock {
                    opinion = true;
                }
            }
            if opinion {
                self.vheight = bnew_height;
            }
        }

        if !self_prop {
            if let Some(justify) = qc_ref {
                self.effects.push_back(Effect::QcFinished(justify));
            }
        }

        if opinion && !self.vote_disabled {
            let vote = Vote {
                voter: self.id,
                blk_hash: bnew_hash,
                cert: PartCert::create(&self.priv_key, bnew_hash),
            };
            self.effects.push_back(Effect::SendVote {
                last_proposer: prop.proposer,
                vote,
            });
        }
        Ok(())
    }

    /// Count a verified vote toward the block's own certificate; the QC is
    /// finalized when the quorum threshold is reached.
    pub fn on_receive_vote(&mut self, vote: Vote) -> Result<(), ConsensusError> {
        debug!("got {}", vote);
        let blk_hash = vote.blk_hash;
        if !self.storage.is_delivered(&blk_hash) {
            return Err(ConsensusError::NotDelivered(blk_hash));
        }

        let nmajority = self.config.nmajority();
        let finished_qc = {
            let blk = self
                .storage
                .find_mut(&blk_hash)
                .ok_or(ConsensusError::NotDelivered(blk_hash))?;
            let qsize = blk.voted.len();
            if qsize >= nmajority {
                return Ok(());
            }
            if !blk.voted.insert(vote.voter) {
                warn!("duplicate vote for {} from {}", blk_hash, vote.voter);
                return Ok(());
            }
            if blk.self_qc.is_none() {
                warn!("vote for block not proposed by this replica: {}", blk_hash);
                blk.self_qc = Some(QuorumCert::new(blk_hash));
            }
            let qc = match blk.self_qc.as_mut() {
                Some(qc) => qc,
                None => return Ok(()),
            };
            qc.add_part(vote.voter, vote.cert);
            if qsize + 1 == nmajority {
                qc.compute();
                Some(qc.clone())
            } else {
                None
            }
        };

        if let Some(qc) = finished_qc {
            self.update_hqc(&blk_hash, &qc);
            self.effects.push_back(Effect::QcFinished(blk_hash));
        }
        Ok(())
    }

    /// Validate a slice against its embedded root and file it in the shard
    /// mailbox. Duplicates and invalid proofs are dropped with a warning.
    pub fn on_receive_slice(&mut self, slice: Slice) {
        if !slice.validate() {
            warn!("invalid slice {}", slice);
            return;
        }
        match self
            .sc
            .insert_shard(slice.blk_hash, slice.index, slice.data.clone())
        {
            Ok(()) => debug!("accepted {}", slice),
            Err(ShardError::DuplicateShard) => warn!("repeated acceptance of {}", slice),
            Err(err) => warn!("rejected {}: {}", slice, err),
        }
    }

    /// Release blocks more than `staleness` parent steps below b_exec,
    /// detaching parent and justify links so the storage refcounts drop.
    ///
    /// Every detached link releases its target once. Justify links drop as
    /// a block is visited; the link a child held to its parent drops only
    /// after the parent itself is done, so a block's outgoing links are
    /// always detached before its entry can be evicted. Blocks still
    /// referenced from above the horizon stay resident until a later walk
    /// detaches those links too.
    pub fn prune(&mut self, staleness: u32) {
        let mut start = self.b_exec;
        for _ in 0..staleness {
            match self.parent0(&start) {
                Some(parent) => start = parent,
                None => return,
            }
        }
        if self.parent0(&start).is_none() {
            return;
        }

        // (block, whether the walk owes it a parent-link release)
        let mut stack = vec![(start, false)];
        while let Some(&(top, owed)) = stack.last() {
            let justify = self.storage.find_mut(&top).and_then(|b| b.qc_ref.take());
            if let Some(justify) = justify {
                self.storage.try_release(&justify);
            }
            let next = self
                .storage
                .find_mut(&top)
                .and_then(|b| b.parent_hashes.pop());
            match next {
                Some(parent) => stack.push((parent, true)),
                None => {
                    self.storage.try_release(&top);
                    if owed {
                        self.storage.try_release(&top);
                    }
                    stack.pop();
                }
            }
        }
    }
}
