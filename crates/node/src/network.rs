//! The network capability the node is polymorphic over, plus an in-process
//! fabric for the demo binary and the end-to-end suite.
//!
//! The real transport (authenticated, ordered, best-effort peer-to-peer
//! messaging) lives outside this system; anything implementing `Network`
//! and feeding the incoming channel will do.

use crate::codec::Message;
use arbor_types::ReplicaId;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

pub type Incoming = mpsc::UnboundedReceiver<(ReplicaId, Vec<u8>)>;

#[async_trait]
pub trait Network: Send + Sync {
    /// Deliver a frame to one peer.
    async fn send(&self, to: ReplicaId, frame: Vec<u8>) -> anyhow::Result<()>;

    /// Deliver a frame to every peer except this replica.
    async fn multicast(&self, frame: Vec<u8>) -> anyhow::Result<()>;
}

/// Decide whether a frame is dropped in transit; return true to drop.
pub type DropFilter = Box<dyn Fn(ReplicaId, ReplicaId, &Message) -> bool + Send + Sync>;

struct HubInner {
    senders: Vec<mpsc::UnboundedSender<(ReplicaId, Vec<u8>)>>,
    filter: Mutex<Option<DropFilter>>,
}

impl HubInner {
    fn deliver(&self, from: ReplicaId, to: ReplicaId, frame: Vec<u8>) {
        if let Some(filter) = self.filter.lock().expect("filter lock").as_ref() {
            if let Ok(msg) = Message::decode(&frame) {
                if filter(from, to, &msg) {
                    debug!("fabric dropped frame {} -> {}", from, to);
                    return;
                }
            }
        }
        // a closed endpoint just loses traffic, like a dead peer
        let _ = self.senders[to as usize].send((from, frame));
    }
}

/// In-process message fabric: per-replica mailboxes with an optional drop
/// filter for loss-injection tests.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new(nreplicas: usize) -> (Self, Vec<(MemoryNetwork, Incoming)>) {
        let mut senders = Vec::with_capacity(nreplicas);
        let mut receivers = Vec::with_capacity(nreplicas);
        for _ in 0..nreplicas {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }
        let inner = Arc::new(HubInner {
            senders,
            filter: Mutex::new(None),
        });
        let endpoints = receivers
            .into_iter()
            .enumerate()
            .map(|(id, rx)| {
                (
                    MemoryNetwork {
                        id: id as ReplicaId,
                        nreplicas,
                        inner: inner.clone(),
                    },
                    rx,
                )
            })
            .collect();
        (MemoryHub { inner }, endpoints)
    }

    pub fn set_drop_filter(&self, filter: DropFilter) {
        *self.inner.filter.lock().expect("filter lock") = Some(filter);
    }

    pub fn clear_drop_filter(&self) {
        *self.inner.filter.lock().expect("filter lock") = None;
    }

    /// Push a raw frame into a mailbox, bypassing any endpoint. Test-only
    /// escape hatch for byzantine traffic.
    pub fn inject(&self, from: ReplicaId, to: ReplicaId, frame: Vec<u8>) {
        let _ = self.inner.senders[to as usize].send((from, frame));
    }
}

pub struct MemoryNetwork {
    id: ReplicaId,
    nreplicas: usize,
    inner: Arc<HubInner>,
}

#[async_trait]
impl Network for MemoryNetwork {
    async fn send(&self, to: ReplicaId, frame: Vec<u8>) -> anyhow::Result<()> {
        if (to as usize) >= self.nreplicas {
            anyhow::bail!("unknown peer {}", to);
        }
        self.inner.deliver(self.id, to, frame);
        Ok(())
    }

    async fn multicast(&self, frame: Vec<u8>) -> anyhow::Result<()> {
        for to in 0..self.nreplicas as ReplicaId {
            if to != self.id {
                self.inner.deliver(self.id, to, frame.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::H256;

    #[tokio::test]
    async fn multicast_reaches_all_peers() {
        let (_hub, mut endpoints) = MemoryHub::new(3);
        let frame = Message::ReqBlock(vec![H256::zero()]).encode();
        endpoints[0].0.multicast(frame).await.unwrap();

        assert!(endpoints[1].1.try_recv().is_ok());
        assert!(endpoints[2].1.try_recv().is_ok());
        assert!(endpoints[0].1.try_recv().is_err());
    }

    #[tokio::test]
    async fn drop_filter_discards_matching_frames() {
        let (hub, mut endpoints) = MemoryHub::new(2);
        hub.set_drop_filter(Box::new(|_, _, msg| {
            matches!(msg, Message::ReqBlock(_))
        }));
        let frame = Message::ReqBlock(vec![H256::zero()]).encode();
        endpoints[0].0.send(1, frame).await.unwrap();
        assert!(endpoints[1].1.try_recv().is_err());
    }
}
