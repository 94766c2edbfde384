use anyhow::Result;
use arbor_crypto::sha256_h256;
use arbor_node::{Cluster, ClusterOptions};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Arbor Node v0.1.0");
    println!("=================\n");

    let opts = ClusterOptions {
        nreplicas: 4,
        blk_size: 1,
        beat_interval: Duration::from_millis(20),
        ..ClusterOptions::default()
    };
    println!(
        "Launching {} replicas (blk_size {}, beat {:?})\n",
        opts.nreplicas, opts.blk_size, opts.beat_interval
    );
    let cluster = Cluster::launch(opts)?;

    let mut finality = cluster.handles[1].subscribe_finality();
    let leader = cluster.handles[0].clone();

    // submit a short command stream through the leader
    let cmds: Vec<_> = (0u8..8)
        .map(|i| sha256_h256(format!("demo command {i}").as_bytes()))
        .collect();
    for cmd in &cmds {
        leader.exec_command(*cmd);
    }

    // the first few commands commit once the chain extends past them
    let mut seen = 0;
    while seen < 4 {
        match tokio::time::timeout(Duration::from_secs(5), finality.recv()).await {
            Ok(Ok(fin)) => {
                println!("finality: {}", fin);
                seen += 1;
            }
            Ok(Err(err)) => anyhow::bail!("finality stream closed: {}", err),
            Err(_) => anyhow::bail!("timed out waiting for finality"),
        }
    }

    println!("\n{} commands decided; shutting down", seen);
    cluster.shutdown();
    Ok(())
}
