//! Leader rotation as a capability the core is polymorphic over.
//!
//! The node's beat timer asks the pacemaker who proposes; the core's
//! effects feed consensus and QC events back so rotation policies can
//! react. View-change correctness of any particular policy is out of
//! scope; these implementations are deliberately small.

use crate::core::HotStuffCore;
use arbor_types::{ReplicaId, H256};

pub trait Pacemaker: Send {
    fn init(&mut self, _core: &HotStuffCore) {}

    /// The replica expected to propose on the next beat.
    fn get_proposer(&self) -> ReplicaId;

    /// A propose beat fired; returns the proposer for this round.
    fn beat(&mut self) -> ReplicaId {
        self.get_proposer()
    }

    /// Where to send a vote after handling a proposal from
    /// `last_proposer`; returns the proposer of the next view.
    fn beat_resp(&mut self, last_proposer: ReplicaId) -> ReplicaId;

    /// A block reached a commit decision.
    fn on_consensus(&mut self, _blk_hash: &H256, _height: u64) {}

    /// A quorum certificate finished forming for this block.
    fn on_qc_finish(&mut self, _blk_hash: &H256) {}

    /// The highest known QC advanced.
    fn on_hqc_update(&mut self, _blk_hash: &H256) {}

    /// Parent choice for the next proposal; taken on trust by the core.
    fn get_parents(&self, core: &HotStuffCore) -> Vec<H256>;
}

/// A single fixed proposer; the simplest useful policy and the workhorse
/// of the test harnesses.
pub struct FixedPacemaker {
    proposer: ReplicaId,
}

impl FixedPacemaker {
    pub fn new(proposer: ReplicaId) -> Self {
        FixedPacemaker { proposer }
    }
}

impl Pacemaker for FixedPacemaker {
    fn get_proposer(&self) -> ReplicaId {
        self.proposer
    }

    fn beat_resp(&mut self, _last_proposer: ReplicaId) -> ReplicaId {
        self.proposer
    }

    fn get_parents(&self, core: &HotStuffCore) -> Vec<H256> {
        vec![core.hqc_block()]
    }
}

/// Rotate the proposer as blocks reach consensus: the leader for the view
/// after a commit at height h is (h + 1) mod n.
pub struct RoundRobinPacemaker {
    nreplicas: usize,
    proposer: ReplicaId,
}

impl RoundRobinPacemaker {
    pub fn new(nreplicas: usize) -> Self {
        RoundRobinPacemaker {
            nreplicas,
            proposer: 0,
        }
    }
}

impl Pacemaker for RoundRobinPacemaker {
    fn get_proposer(&self) -> ReplicaId {
        self.proposer
    }

    fn beat_resp(&mut self, _last_proposer: ReplicaId) -> ReplicaId {
        self.proposer
    }

    fn on_consensus(&mut self, _blk_hash: &H256, height: u64) {
        self.proposer = ((height + 1) % self.nreplicas as u64) as ReplicaId;
    }

    fn get_parents(&self, core: &HotStuffCore) -> Vec<H256> {
        vec![core.hqc_block()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_rotates_on_consensus() {
        let mut pm = RoundRobinPacemaker::new(4);
        assert_eq!(pm.get_proposer(), 0);
        pm.on_consensus(&H256::zero(), 2);
        assert_eq!(pm.get_proposer(), 3);
        pm.on_consensus(&H256::zero(), 3);
        assert_eq!(pm.get_proposer(), 0);
    }
}
