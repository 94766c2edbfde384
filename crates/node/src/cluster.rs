//! In-process cluster harness: N replicas over the memory fabric.
//!
//! Used by the demo binary and the end-to-end suite; each replica runs the
//! full stack (codec, delivery machinery, core, propose pipeline).

use crate::base::{HotStuffBase, NodeOptions, ReplicaHandle};
use crate::network::MemoryHub;
use anyhow::Result;
use arbor_consensus::{FixedPacemaker, HotStuffCore, Pacemaker, RoundRobinPacemaker};
use arbor_crypto::Keypair;
use arbor_types::{ReplicaConfig, ReplicaId, ReplicaInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::error;

#[derive(Clone, Debug)]
pub struct ClusterOptions {
    pub nreplicas: usize,
    pub blk_size: usize,
    pub beat_interval: Duration,
    pub two_chain: bool,
    pub prune_staleness: u32,
    /// Rotate the proposer on commits instead of pinning replica 0.
    pub rotate_leader: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        ClusterOptions {
            nreplicas: 4,
            blk_size: 1,
            beat_interval: Duration::from_millis(10),
            two_chain: false,
            prune_staleness: 128,
            rotate_leader: false,
        }
    }
}

pub struct Cluster {
    pub handles: Vec<ReplicaHandle>,
    pub hub: MemoryHub,
    tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// Generate keys, wire the fabric and spawn one event loop per replica.
    pub fn launch(opts: ClusterOptions) -> Result<Self> {
        let keys: Vec<Keypair> = (0..opts.nreplicas).map(|_| Keypair::generate()).collect();
        let config = ReplicaConfig::new(
            keys.iter()
                .enumerate()
                .map(|(i, key)| ReplicaInfo {
                    id: i as ReplicaId,
                    pubkey: key.public_key(),
                })
                .collect(),
        );

        let (hub, endpoints) = MemoryHub::new(opts.nreplicas);
        let mut handles = Vec::with_capacity(opts.nreplicas);
        let mut tasks = Vec::with_capacity(opts.nreplicas);

        for (key, (net, incoming)) in keys.into_iter().zip(endpoints) {
            let id = handles.len() as ReplicaId;
            let core = HotStuffCore::new(id, key, config.clone(), opts.two_chain)?;
            let pmaker: Box<dyn Pacemaker> = if opts.rotate_leader {
                Box::new(RoundRobinPacemaker::new(opts.nreplicas))
            } else {
                Box::new(FixedPacemaker::new(0))
            };
            let (base, handle) = HotStuffBase::new(
                core,
                pmaker,
                Arc::new(net),
                incoming,
                NodeOptions {
                    blk_size: opts.blk_size,
                    beat_interval: opts.beat_interval,
                    prune_staleness: opts.prune_staleness,
                },
            );
            handles.push(handle);
            tasks.push(tokio::spawn(async move {
                if let Err(err) = base.run().await {
                    error!("replica {} stopped: {}", id, err);
                }
            }));
        }

        Ok(Cluster {
            handles,
            hub,
            tasks,
        })
    }

    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.shutdown();
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown();
        for task in &self.tasks {
            task.abort();
        }
    }
}
