//! Node configuration, parsed from TOML.

use anyhow::{bail, Context, Result};
use arbor_types::{PublicKey, ReplicaConfig, ReplicaInfo};
use serde::Deserialize;
use std::time::Duration;

fn default_beat_ms() -> u64 {
    20
}

fn default_staleness() -> u32 {
    128
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplicaEntry {
    pub id: u16,
    /// 64-char hex ed25519 verifying key.
    pub pubkey: String,
    /// Transport address label; opaque to this crate.
    #[serde(default)]
    pub addr: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NodeConfig {
    /// Commands batched per proposal.
    pub blk_size: usize,
    #[serde(default = "default_beat_ms")]
    pub beat_interval_ms: u64,
    /// Use the two-chain commit rule instead of the three-chain default.
    #[serde(default)]
    pub two_chain: bool,
    #[serde(default = "default_staleness")]
    pub prune_staleness: u32,
    pub replicas: Vec<ReplicaEntry>,
}

impl NodeConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(raw).context("failed to parse node config")?;
        if config.blk_size == 0 {
            bail!("blk_size must be at least 1");
        }
        if config.replicas.len() < 4 {
            bail!("need at least 4 replicas to tolerate a fault");
        }
        Ok(config)
    }

    pub fn beat_interval(&self) -> Duration {
        Duration::from_millis(self.beat_interval_ms)
    }

    /// Resolve the replica table into the consensus configuration.
    pub fn replica_config(&self) -> Result<ReplicaConfig> {
        let mut infos = Vec::with_capacity(self.replicas.len());
        for entry in &self.replicas {
            let bytes = hex::decode(&entry.pubkey)
                .with_context(|| format!("replica {} pubkey is not hex", entry.id))?;
            if bytes.len() != 32 {
                bail!("replica {} pubkey must be 32 bytes", entry.id);
            }
            infos.push(ReplicaInfo {
                id: entry.id,
                pubkey: PublicKey::from_bytes(bytes),
            });
        }
        Ok(ReplicaConfig::new(infos))
    }
}
