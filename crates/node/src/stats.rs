use once_cell::sync::Lazy;
use prometheus::{register_int_counter, IntCounter};

pub struct NodeStats {
    pub fetched: IntCounter,
    pub delivered: IntCounter,
    pub decided: IntCounter,
}

impl NodeStats {
    fn new() -> Self {
        NodeStats {
            fetched: register_int_counter!("arbor_node_blocks_fetched", "Blocks fetched from peers")
                .expect("register blocks_fetched"),
            delivered: register_int_counter!(
                "arbor_node_blocks_delivered",
                "Blocks delivered to the consensus core"
            )
            .expect("register blocks_delivered"),
            decided: register_int_counter!(
                "arbor_node_blocks_decided",
                "Blocks that reached a commit decision"
            )
            .expect("register blocks_decided"),
        }
    }
}

pub static NODE_STATS: Lazy<NodeStats> = Lazy::new(NodeStats::new);
