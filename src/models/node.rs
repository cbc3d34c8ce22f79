//! Node health as reported by the backend heartbeat monitor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NodeStorage {
    pub used_bytes: u64,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    pub usage_percent: f64,
}

/// Health of a single node. The name is the unique key.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct NodeHealth {
    pub name: String,
    pub status: NodeStatus,
    pub storage: NodeStorage,
    pub last_heartbeat: Option<String>,
    pub seconds_since_heartbeat: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct NodeHealthEntry {
    #[serde(default = "unknown_status")]
    status: NodeStatus,
    storage: NodeStorage,
    #[serde(default)]
    last_heartbeat: Option<String>,
    #[serde(default)]
    seconds_since_heartbeat: Option<f64>,
}

fn unknown_status() -> NodeStatus {
    NodeStatus::Unknown
}

/// `GET /admin/nodes/health` body: a map keyed by node name.
#[derive(Deserialize, Debug)]
pub struct NodeHealthReport {
    #[serde(default)]
    pub timestamp: Option<String>,
    nodes: BTreeMap<String, NodeHealthEntry>,
}

impl NodeHealthReport {
    /// Flatten into a name-ordered list.
    pub fn into_nodes(self) -> Vec<NodeHealth> {
        self.nodes
            .into_iter()
            .map(|(name, entry)| NodeHealth {
                name,
                status: entry.status,
                storage: entry.storage,
                last_heartbeat: entry.last_heartbeat,
                seconds_since_heartbeat: entry.seconds_since_heartbeat,
            })
            .collect()
    }
}
