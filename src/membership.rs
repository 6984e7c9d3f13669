// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster membership oracle.
//!
//! The dispatcher staggers slice fire times by this node's ordinal among
//! the currently-up nodes, so concurrent nodes running the same schedule
//! spread their exchanges across each slice instead of firing together.

use crate::dispatch::NodeInfo;
use tracing::warn;

/// Trait defining what the coordinator needs from cluster membership.
///
/// Both methods are cheap, synchronous reads of cached cluster state.
pub trait MembershipOracle: Send + Sync + 'static {
    /// Identifiers of the currently-up nodes, in no particular order.
    fn up_nodes(&self) -> Vec<String>;

    /// This node's identifier.
    fn self_node(&self) -> String;
}

/// Compute this node's slot: ordinal = 1-based position of self in the
/// sorted up-node list, count = number of up-nodes.
///
/// A node absent from its own membership view (mid-rejoin, or a
/// misconfigured oracle) degrades to ordinal 1 so scheduling continues.
pub fn node_info(oracle: &dyn MembershipOracle) -> NodeInfo {
    let mut nodes = oracle.up_nodes();
    nodes.sort();
    let this = oracle.self_node();
    let count = nodes.len().max(1) as u32;

    match nodes.iter().position(|n| *n == this) {
        Some(idx) => NodeInfo {
            ordinal: idx as u32 + 1,
            count,
        },
        None => {
            warn!(
                node = %this,
                up_nodes = nodes.len(),
                "Node missing from its own up-node list, scheduling as ordinal 1"
            );
            NodeInfo { ordinal: 1, count }
        }
    }
}

/// A fixed membership view, for testing and single-node deployments.
#[derive(Debug, Clone)]
pub struct StaticMembership {
    nodes: Vec<String>,
    this_node: String,
}

impl StaticMembership {
    pub fn new(nodes: Vec<String>, this_node: impl Into<String>) -> Self {
        Self {
            nodes,
            this_node: this_node.into(),
        }
    }

    /// A one-node cluster.
    pub fn solo(node: impl Into<String>) -> Self {
        let node = node.into();
        Self {
            nodes: vec![node.clone()],
            this_node: node,
        }
    }
}

impl MembershipOracle for StaticMembership {
    fn up_nodes(&self) -> Vec<String> {
        self.nodes.clone()
    }

    fn self_node(&self) -> String {
        self.this_node.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinal_from_sorted_position() {
        let membership = StaticMembership::new(
            vec![
                "node-c".to_string(),
                "node-a".to_string(),
                "node-b".to_string(),
            ],
            "node-b",
        );
        let info = node_info(&membership);
        assert_eq!(info.ordinal, 2);
        assert_eq!(info.count, 3);
    }

    #[test]
    fn test_solo_membership() {
        let membership = StaticMembership::solo("node-1");
        let info = node_info(&membership);
        assert_eq!(info, NodeInfo { ordinal: 1, count: 1 });
    }

    #[test]
    fn test_missing_self_degrades_to_first_slot() {
        let membership = StaticMembership::new(
            vec!["node-a".to_string(), "node-b".to_string()],
            "node-z",
        );
        let info = node_info(&membership);
        assert_eq!(info.ordinal, 1);
        assert_eq!(info.count, 2);
    }

    #[test]
    fn test_empty_up_nodes_still_schedulable() {
        let membership = StaticMembership::new(vec![], "node-a");
        let info = node_info(&membership);
        assert_eq!(info, NodeInfo { ordinal: 1, count: 1 });
    }
}
