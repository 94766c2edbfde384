use crate::primitives::{PublicKey, ReplicaId};
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct ReplicaInfo {
    pub id: ReplicaId,
    pub pubkey: PublicKey,
}

/// The replica table plus the derived quorum parameters.
///
/// For n replicas the tolerated fault count is f = (n - 1) / 3 and the
/// quorum size is nmajority = n - f. The erasure threshold k equals
/// nmajority.
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    replicas: BTreeMap<ReplicaId, ReplicaInfo>,
    nmajority: usize,
}

impl ReplicaConfig {
    pub fn new(replicas: Vec<ReplicaInfo>) -> Self {
        let n = replicas.len();
        let nfaulty = n.saturating_sub(1) / 3;
        let map = replicas.into_iter().map(|r| (r.id, r)).collect();
        ReplicaConfig {
            replicas: map,
            nmajority: n - nfaulty,
        }
    }

    pub fn nreplicas(&self) -> usize {
        self.replicas.len()
    }

    pub fn nfaulty(&self) -> usize {
        self.nreplicas().saturating_sub(1) / 3
    }

    pub fn nmajority(&self) -> usize {
        self.nmajority
    }

    pub fn pubkey(&self, id: ReplicaId) -> Option<&PublicKey> {
        self.replicas.get(&id).map(|r| &r.pubkey)
    }

    pub fn contains(&self, id: ReplicaId) -> bool {
        self.replicas.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.replicas.keys().copied()
    }
}
