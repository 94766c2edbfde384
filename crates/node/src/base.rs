//! The replica event loop.
//!
//! One task owns the HotStuff core and every piece of consensus state.
//! Signature checks and erasure coding run on the blocking pool and
//! re-enter through the internal event channel, so the loop only ever
//! observes completed work. Commits advance `b_exec` immediately; the
//! per-command Finality records are emitted by a dedicated task that
//! resolves each committed block's decode job in commit order.

use crate::codec::Message;
use crate::network::{Incoming, Network};
use crate::stats::NODE_STATS;
use arbor_consensus::{
    Block, DecidedBlock, Effect, HotStuffCore, NewBlk, Pacemaker, Proposal, Vote,
};
use arbor_types::{Finality, ReplicaId, H256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task;
use tracing::{debug, info, warn};

pub type DecisionCallback = Box<dyn FnOnce(Finality) + Send>;

/// Lightweight commit notification (the payload may still be in flight).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitEvent {
    pub blk_hash: H256,
    pub height: u64,
}

#[derive(Clone, Debug)]
pub struct NodeOptions {
    /// Commands batched per proposal.
    pub blk_size: usize,
    /// Pacemaker beat period.
    pub beat_interval: Duration,
    /// Parent-steps below b_exec before blocks are released; 0 disables.
    pub prune_staleness: u32,
}

impl Default for NodeOptions {
    fn default() -> Self {
        NodeOptions {
            blk_size: 1,
            beat_interval: Duration::from_millis(20),
            prune_staleness: 128,
        }
    }
}

enum InternalEvent {
    VerifiedVote(Vote),
    VerifiedBlock { blk: Block, from: ReplicaId },
    DroppedBlock(H256),
    NewBlk(NewBlk),
    Finality(Finality),
    Shutdown,
}

enum PostDelivery {
    Proposal(Proposal),
    Vote(Vote),
}

/// A block (or a reference to one) waiting for its ancestors.
#[derive(Default)]
struct Pending {
    blk: Option<Block>,
    from: ReplicaId,
    actions: Vec<PostDelivery>,
}

/// Client-facing handle: command submission, finality and commit streams.
#[derive(Clone)]
pub struct ReplicaHandle {
    pub id: ReplicaId,
    cmd_tx: mpsc::UnboundedSender<(H256, Option<DecisionCallback>)>,
    finality_tx: broadcast::Sender<Finality>,
    commit_tx: broadcast::Sender<CommitEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
}

impl ReplicaHandle {
    /// Enqueue a command hash for replication.
    pub fn exec_command(&self, cmd_hash: H256) {
        let _ = self.cmd_tx.send((cmd_hash, None));
    }

    /// Enqueue a command hash and register a one-shot decision callback.
    pub fn exec_command_with(&self, cmd_hash: H256, callback: DecisionCallback) {
        let _ = self.cmd_tx.send((cmd_hash, Some(callback)));
    }

    pub fn subscribe_finality(&self) -> broadcast::Receiver<Finality> {
        self.finality_tx.subscribe()
    }

    pub fn subscribe_commits(&self) -> broadcast::Receiver<CommitEvent> {
        self.commit_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.internal_tx.send(InternalEvent::Shutdown);
    }
}

pub struct HotStuffBase {
    core: HotStuffCore,
    pmaker: Box<dyn Pacemaker>,
    net: Arc<dyn Network>,
    incoming: Incoming,
    opts: NodeOptions,

    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    cmd_rx: mpsc::UnboundedReceiver<(H256, Option<DecisionCallback>)>,

    decision_waiting: HashMap<H256, DecisionCallback>,
    cmd_pending_buffer: VecDeque<H256>,
    blk_queue: VecDeque<NewBlk>,
    pending: HashMap<H256, Pending>,
    fetching: HashSet<H256>,

    finality_tx: broadcast::Sender<Finality>,
    commit_tx: broadcast::Sender<CommitEvent>,
    decided_tx: mpsc::UnboundedSender<DecidedBlock>,
    decided_rx: Option<mpsc::UnboundedReceiver<DecidedBlock>>,
    encode_tx: mpsc::UnboundedSender<Vec<H256>>,
    encode_rx: Option<mpsc::UnboundedReceiver<Vec<H256>>>,
    beats: u64,
}

impl HotStuffBase {
    pub fn new(
        core: HotStuffCore,
        pmaker: Box<dyn Pacemaker>,
        net: Arc<dyn Network>,
        incoming: Incoming,
        opts: NodeOptions,
    ) -> (Self, ReplicaHandle) {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (decided_tx, decided_rx) = mpsc::unbounded_channel();
        let (encode_tx, encode_rx) = mpsc::unbounded_channel();
        let (finality_tx, _) = broadcast::channel(1024);
        let (commit_tx, _) = broadcast::channel(1024);

        let handle = ReplicaHandle {
            id: core.id(),
            cmd_tx,
            finality_tx: finality_tx.clone(),
            commit_tx: commit_tx.clone(),
            internal_tx: internal_tx.clone(),
        };
        let base = HotStuffBase {
            core,
            pmaker,
            net,
            incoming,
            opts,
            internal_tx,
            internal_rx,
            cmd_rx,
            decision_waiting: HashMap::new(),
            cmd_pending_buffer: VecDeque::new(),
            blk_queue: VecDeque::new(),
            pending: HashMap::new(),
            fetching: HashSet::new(),
            finality_tx,
            commit_tx,
            decided_tx,
            decided_rx: Some(decided_rx),
            encode_tx,
            encode_rx: Some(encode_rx),
            beats: 0,
        };
        (base, handle)
    }

    /// Drive the replica until shutdown or a fatal safety error.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.pmaker.init(&self.core);

        // commit-order Finality emission
        if let Some(decided_rx) = self.decided_rx.take() {
            task::spawn(emission_task(
                decided_rx,
                self.core.id(),
                self.internal_tx.clone(),
            ));
        }
        // batches encode off the loop, one at a time, preserving order
        if let Some(encode_rx) = self.encode_rx.take() {
            task::spawn(encode_task(
                encode_rx,
                *self.core.coder(),
                self.internal_tx.clone(),
            ));
        }

        let mut beat = tokio::time::interval(self.opts.beat_interval);
        beat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("replica {} running", self.core.id());
        loop {
            tokio::select! {
                Some((from, frame)) = self.incoming.recv() => {
                    if let Err(err) = self.handle_frame(from, frame).await {
                        anyhow::bail!("fatal: {}", err);
                    }
                }
                Some(event) = self.internal_rx.recv() => {
                    if matches!(event, InternalEvent::Shutdown) {
                        info!("replica {} shutting down", self.core.id());
                        return Ok(());
                    }
                    if let Err(err) = self.handle_internal(event).await {
                        anyhow::bail!("fatal: {}", err);
                    }
                }
                Some((cmd_hash, callback)) = self.cmd_rx.recv() => {
                    self.handle_command(cmd_hash, callback);
                }
                _ = beat.tick() => {
                    if let Err(err) = self.on_beat().await {
                        anyhow::bail!("fatal: {}", err);
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, from: ReplicaId, frame: Vec<u8>) -> anyhow::Result<()> {
        let msg = match Message::decode(&frame) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("undecodable frame from {}: {}", from, err);
                return Ok(());
            }
        };
        match msg {
            Message::Propose(prop) => self.on_msg_propose(from, prop).await?,
            Message::Vote(vote) => self.on_msg_vote(from, vote),
            Message::ReqBlock(hashes) => self.on_msg_req_block(from, hashes).await?,
            Message::RespBlock(blocks) => self.on_msg_resp_block(from, blocks),
            Message::Slice { hash, slice } => {
                if hash != arbor_crypto::sha256_h256(&slice.to_bytes()) {
                    warn!("invalid slice content hash from {}", from);
                    return Ok(());
                }
                self.core.on_receive_slice(slice);
                self.process_effects().await?;
            }
        }
        Ok(())
    }

    async fn on_msg_propose(&mut self, from: ReplicaId, prop: Proposal) -> anyhow::Result<()> {
        if from != prop.proposer {
            warn!("proposal for {} relayed by {}", prop.proposer, from);
            return Ok(());
        }
        let blk_hash = prop.blk.hash();
        if self.core.storage().is_delivered(&blk_hash) {
            self.core.on_receive_proposal(prop)?;
            self.process_effects().await?;
            return Ok(());
        }

        let need_verify = {
            let entry = self.pending.entry(blk_hash).or_default();
            entry.from = from;
            entry.actions.push(PostDelivery::Proposal(prop.clone()));
            entry.blk.is_none()
        };
        if need_verify {
            self.spawn_block_verify(prop.blk, from);
        }
        Ok(())
    }

    fn on_msg_vote(&mut self, from: ReplicaId, vote: Vote) {
        if from != vote.voter {
            warn!("vote from {} relayed by {}", vote.voter, from);
            return;
        }
        let config = self.core.config().clone();
        let tx = self.internal_tx.clone();
        task::spawn_blocking(move || {
            let sound = vote.cert.obj_hash == vote.blk_hash
                && vote.cert.verify(&config, vote.voter).is_ok();
            if sound {
                let _ = tx.send(InternalEvent::VerifiedVote(vote));
            } else {
                warn!("invalid vote from {}", vote.voter);
            }
        });
    }

    async fn on_msg_req_block(
        &mut self,
        from: ReplicaId,
        hashes: Vec<H256>,
    ) -> anyhow::Result<()> {
        let mut blocks = Vec::new();
        for hash in hashes {
            if let Some(blk) = self.core.storage().find(&hash) {
                blocks.push(blk.clone());
            }
        }
        if !blocks.is_empty() {
            self.net
                .send(from, Message::RespBlock(blocks).encode())
                .await?;
        }
        Ok(())
    }

    fn on_msg_resp_block(&mut self, from: ReplicaId, blocks: Vec<Block>) {
        for blk in blocks {
            let hash = blk.hash();
            if !self.fetching.remove(&hash) {
                debug!("unsolicited block {} from {}", hash, from);
                continue;
            }
            NODE_STATS.fetched.inc();
            self.spawn_block_verify(blk, from);
        }
    }

    /// Structural and certificate checks off the event loop; outcome
    /// re-enters as VerifiedBlock / DroppedBlock.
    fn spawn_block_verify(&self, blk: Block, from: ReplicaId) {
        let config = self.core.config().clone();
        let genesis = self.core.genesis();
        let tx = self.internal_tx.clone();
        task::spawn_blocking(move || {
            let hash = blk.hash();
            let qc_ok = match &blk.qc {
                Some(qc) => *qc.obj_hash() == genesis || qc.verify(&config),
                None => false,
            };
            if qc_ok && !blk.parent_hashes.is_empty() {
                let _ = tx.send(InternalEvent::VerifiedBlock { blk, from });
            } else {
                warn!("verification failed for block {}", hash);
                let _ = tx.send(InternalEvent::DroppedBlock(hash));
            }
        });
    }

    async fn handle_internal(&mut self, event: InternalEvent) -> anyhow::Result<()> {
        match event {
            InternalEvent::VerifiedVote(vote) => {
                if self.core.storage().is_delivered(&vote.blk_hash) {
                    self.core.on_receive_vote(vote)?;
                    self.process_effects().await?;
                } else {
                    let voter = vote.voter;
                    let blk_hash = vote.blk_hash;
                    let need_fetch = {
                        let entry = self.pending.entry(blk_hash).or_default();
                        entry.actions.push(PostDelivery::Vote(vote));
                        if entry.blk.is_none() {
                            entry.from = voter;
                            true
                        } else {
                            false
                        }
                    };
                    if need_fetch {
                        self.request_fetch(blk_hash, voter).await?;
                    }
                }
            }
            InternalEvent::VerifiedBlock { blk, from } => {
                let hash = blk.hash();
                let entry = self.pending.entry(hash).or_default();
                if entry.blk.is_none() {
                    entry.blk = Some(blk);
                    entry.from = from;
                }
                self.try_progress().await?;
            }
            InternalEvent::DroppedBlock(hash) => {
                self.pending.remove(&hash);
            }
            InternalEvent::NewBlk(batch) => {
                self.blk_queue.push_back(batch);
            }
            InternalEvent::Finality(fin) => {
                if let Some(callback) = self.decision_waiting.remove(&fin.cmd_hash) {
                    callback(fin.clone());
                }
                let _ = self.finality_tx.send(fin);
            }
            InternalEvent::Shutdown => {}
        }
        Ok(())
    }

    /// Deliver every parked block whose ancestors are now resident and
    /// delivered, requesting fetches for whatever is still missing.
    async fn try_progress(&mut self) -> anyhow::Result<()> {
        loop {
            let mut ready = None;
            let mut missing: Vec<(H256, ReplicaId)> = Vec::new();

            for (hash, entry) in &self.pending {
                let blk = match &entry.blk {
                    Some(blk) => blk,
                    None => continue,
                };
                let mut deps_met = true;
                for parent in &blk.parent_hashes {
                    if !self.core.storage().is_delivered(parent) {
                        deps_met = false;
                        if !self.is_inbound(parent) {
                            missing.push((*parent, entry.from));
                        }
                    }
                }
                if let Some(qc) = &blk.qc {
                    let justify = *qc.obj_hash();
                    if !self.core.storage().contains(&justify) {
                        deps_met = false;
                        if !self.is_inbound(&justify) {
                            missing.push((justify, entry.from));
                        }
                    }
                }
                if deps_met {
                    ready = Some(*hash);
                    break;
                }
            }

            for (hash, peer) in missing {
                self.request_fetch(hash, peer).await?;
            }

            let Some(hash) = ready else { return Ok(()) };
            let Some(entry) = self.pending.remove(&hash) else { return Ok(()) };
            let Some(blk) = entry.blk else { return Ok(()) };

            self.core.add_blk(blk);
            if self.core.on_deliver_blk(&hash)? {
                NODE_STATS.delivered.inc();
            }
            for action in entry.actions {
                match action {
                    PostDelivery::Proposal(prop) => self.core.on_receive_proposal(prop)?,
                    PostDelivery::Vote(vote) => self.core.on_receive_vote(vote)?,
                }
                self.process_effects().await?;
            }
            self.process_effects().await?;
        }
    }

    /// Already resident, parked, or on the wire.
    fn is_inbound(&self, hash: &H256) -> bool {
        self.core.storage().contains(hash)
            || self.fetching.contains(hash)
            || self
                .pending
                .get(hash)
                .map(|e| e.blk.is_some())
                .unwrap_or(false)
    }

    async fn request_fetch(&mut self, hash: H256, peer: ReplicaId) -> anyhow::Result<()> {
        if !self.fetching.insert(hash) {
            return Ok(());
        }
        debug!("fetching {} from {}", hash, peer);
        self.net
            .send(peer, Message::ReqBlock(vec![hash]).encode())
            .await
    }

    fn handle_command(&mut self, cmd_hash: H256, callback: Option<DecisionCallback>) {
        if let Some(callback) = callback {
            if self.decision_waiting.contains_key(&cmd_hash) {
                // already pending; answer the duplicate immediately
                callback(Finality {
                    replica: self.core.id(),
                    status: 0,
                    seq: 0,
                    height: 0,
                    cmd_hash,
                    blk_hash: H256::zero(),
                });
            } else {
                self.decision_waiting.insert(cmd_hash, callback);
            }
        }

        if self.pmaker.get_proposer() != self.core.id() {
            return;
        }
        self.cmd_pending_buffer.push_back(cmd_hash);
        if self.cmd_pending_buffer.len() >= self.opts.blk_size {
            let cmds: Vec<H256> = self
                .cmd_pending_buffer
                .drain(..self.opts.blk_size)
                .collect();
            let _ = self.encode_tx.send(cmds);
        }
    }

    async fn on_beat(&mut self) -> anyhow::Result<()> {
        self.beats += 1;
        if self.pmaker.beat() == self.core.id() {
            if let Some(batch) = self.blk_queue.pop_front() {
                let parents = self.pmaker.get_parents(&self.core);
                self.core.on_propose(batch, parents, Vec::new())?;
                self.process_effects().await?;
            }
        }
        if self.opts.prune_staleness > 0 && self.beats % 64 == 0 {
            self.core.prune(self.opts.prune_staleness);
        }
        Ok(())
    }

    /// Drain the core's outbox, routing until it stays empty (a vote routed
    /// to ourselves can enqueue further effects).
    async fn process_effects(&mut self) -> anyhow::Result<()> {
        loop {
            let effects = self.core.take_effects();
            if effects.is_empty() {
                return Ok(());
            }
            for effect in effects {
                match effect {
                    Effect::SendVote {
                        last_proposer,
                        vote,
                    } => {
                        let target = self.pmaker.beat_resp(last_proposer);
                        if target == self.core.id() {
                            self.core.on_receive_vote(vote)?;
                        } else {
                            self.net
                                .send(target, Message::Vote(vote).encode())
                                .await?;
                        }
                    }
                    Effect::BroadcastProposals(props) => {
                        for (rid, prop) in props.into_iter().enumerate() {
                            let rid = rid as ReplicaId;
                            if rid != self.core.id() {
                                self.net
                                    .send(rid, Message::Propose(prop).encode())
                                    .await?;
                            }
                        }
                    }
                    Effect::BroadcastSlice(slice) => {
                        self.net.multicast(Message::slice(slice).encode()).await?;
                    }
                    Effect::Decided(decided) => {
                        NODE_STATS.decided.inc();
                        self.pmaker.on_consensus(&decided.blk_hash, decided.height);
                        let _ = self.commit_tx.send(CommitEvent {
                            blk_hash: decided.blk_hash,
                            height: decided.height,
                        });
                        let _ = self.decided_tx.send(decided);
                    }
                    Effect::QcFinished(hash) => self.pmaker.on_qc_finish(&hash),
                    Effect::HqcUpdated(hash) => self.pmaker.on_hqc_update(&hash),
                }
            }
        }
    }
}

/// Erasure-encode command batches one at a time so proposals leave the
/// queue in submission order.
async fn encode_task(
    mut encode_rx: mpsc::UnboundedReceiver<Vec<H256>>,
    coder: arbor_da_erasure::ErasureCoder,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
) {
    while let Some(cmds) = encode_rx.recv().await {
        match task::spawn_blocking(move || NewBlk::build(&coder, cmds)).await {
            Ok(Ok(batch)) => {
                if internal_tx.send(InternalEvent::NewBlk(batch)).is_err() {
                    return;
                }
            }
            Ok(Err(err)) => warn!("batch encode failed: {}", err),
            Err(err) => warn!("encode task died: {}", err),
        }
    }
}

/// Resolve decode jobs in commit order and emit one Finality per command.
async fn emission_task(
    mut decided_rx: mpsc::UnboundedReceiver<DecidedBlock>,
    id: ReplicaId,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
) {
    while let Some(decided) = decided_rx.recv().await {
        let Some(job) = decided.job else {
            // shard mailbox never filled; the commit already logged it
            continue;
        };
        match job.await {
            Ok(Ok(cmds)) => {
                for (seq, cmd_hash) in cmds.into_iter().enumerate() {
                    let fin = Finality {
                        replica: id,
                        status: 1,
                        seq: seq as u64,
                        height: decided.height,
                        cmd_hash,
                        blk_hash: decided.blk_hash,
                    };
                    if internal_tx.send(InternalEvent::Finality(fin)).is_err() {
                        return;
                    }
                }
            }
            Ok(Err(err)) => warn!("payload recovery failed for {}: {}", decided.blk_hash, err),
            Err(err) => warn!("decode task died for {}: {}", decided.blk_hash, err),
        }
    }
}
