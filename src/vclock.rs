// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Vector clocks for causal comparison of object versions.
//!
//! The repair decider compares the source and sink clocks of each
//! divergent key to decide whether the sink already holds a strictly
//! newer version. Clocks arrive in their persisted wire form (JSON) and
//! are decoded before comparison.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-node logical clock tracking the causal history of an object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorClock {
    counters: HashMap<String, u64>,
}

impl VectorClock {
    /// Create an empty vector clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the entry for a node.
    pub fn tick(&mut self, node_id: &str) {
        *self.counters.entry(node_id.to_string()).or_insert(0) += 1;
    }

    /// Merge another clock into this one, keeping the maximum per node.
    pub fn merge(&mut self, other: &Self) {
        for (node, &counter) in &other.counters {
            let entry = self.counters.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(counter);
        }
    }

    /// Compare two clocks to determine their causal relationship.
    pub fn compare(&self, other: &Self) -> CausalOrdering {
        let mut less = false;
        let mut greater = false;

        for node in self.counters.keys().chain(other.counters.keys()) {
            let left = self.counters.get(node).copied().unwrap_or(0);
            let right = other.counters.get(node).copied().unwrap_or(0);
            if left < right {
                less = true;
            } else if left > right {
                greater = true;
            }
        }

        match (less, greater) {
            (false, false) => CausalOrdering::Equal,
            (true, false) => CausalOrdering::Less,
            (false, true) => CausalOrdering::Greater,
            (true, true) => CausalOrdering::Concurrent,
        }
    }

    /// Strict dominance: every component `>=` and at least one `>`.
    pub fn dominates(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrdering::Greater
    }

    /// Decode a clock from its persisted wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode a clock to its persisted wire form.
    pub fn encode(&self) -> Vec<u8> {
        // HashMap-of-integers serialization cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Relationship between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrdering {
    /// `self` happened-before `other`.
    Less,
    /// Clocks are identical.
    Equal,
    /// `self` happened-after `other`.
    Greater,
    /// Neither clock dominates: concurrent updates.
    Concurrent,
}
