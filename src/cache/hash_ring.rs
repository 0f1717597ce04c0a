//! # Consistent Hash Ring
//!
//! Routes cache keys to distributed-tier nodes. Each physical node owns
//! `virtual_nodes` positions on a 64-bit ring; a key belongs to the owner of
//! the first position at or after the key's hash, wrapping past the end.
//!
//! Positions are the first eight bytes (big endian) of the SHA-256 digest of
//! `"{node}#{index}"`, so every process computes the same ring for the same
//! membership. When two virtual positions collide the lexicographically
//! smaller node id owns the position, which keeps the ring independent of the
//! order nodes were added in.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::events::{EventPublisher, RingEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashRingError {
    #[error("No nodes available in hash ring")]
    NoNodesAvailable,
}

/// Position of `input` on the ring
pub fn ring_position(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    virtual_nodes: usize,
    ring: BTreeMap<u64, String>,
    nodes: BTreeSet<String>,
    events: Option<EventPublisher>,
}

impl ConsistentHashRing {
    /// Create an empty ring; `virtual_nodes` is clamped to at least 1
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            ring: BTreeMap::new(),
            nodes: BTreeSet::new(),
            events: None,
        }
    }

    /// Create a ring with initial members
    pub fn with_nodes<I, S>(virtual_nodes: usize, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self::new(virtual_nodes);
        for node in nodes {
            ring.add_node(node);
        }
        ring
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Add a node; returns `false` if it was already a member
    pub fn add_node(&mut self, node: impl Into<String>) -> bool {
        let node = node.into();
        if !self.nodes.insert(node.clone()) {
            debug!(node = %node, "Hash ring already contains node");
            return false;
        }

        self.place_node(&node);

        info!(
            node = %node,
            positions = self.virtual_nodes,
            members = self.nodes.len(),
            "🔗 RING: Node added"
        );
        self.publish(RingEvent::NodeAdded {
            node,
            positions: self.virtual_nodes,
        });
        true
    }

    /// Remove a node; returns `false` if it was not a member
    pub fn remove_node(&mut self, node: &str) -> bool {
        if !self.nodes.remove(node) {
            debug!(node = %node, "Hash ring does not contain node");
            return false;
        }

        // Rebuild so that positions the removed node won on a collision fall
        // back to the surviving owner.
        self.ring.clear();
        let members: Vec<String> = self.nodes.iter().cloned().collect();
        for member in &members {
            self.place_node(member);
        }

        info!(
            node = %node,
            members = self.nodes.len(),
            "🔗 RING: Node removed"
        );
        self.publish(RingEvent::NodeRemoved {
            node: node.to_string(),
            positions: self.virtual_nodes,
        });
        true
    }

    /// Node responsible for `key`
    pub fn get_node(&self, key: &str) -> Result<String, HashRingError> {
        let hash = ring_position(key);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node.clone())
            .ok_or(HashRingError::NoNodesAvailable)
    }

    /// Current members in lexicographic order
    pub fn nodes(&self) -> Vec<String> {
        self.nodes.iter().cloned().collect()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Occupied ring positions (less than `len() * virtual_nodes` on collisions)
    pub fn position_count(&self) -> usize {
        self.ring.len()
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    fn place_node(&mut self, node: &str) {
        for index in 0..self.virtual_nodes {
            let position = ring_position(&format!("{node}#{index}"));
            match self.ring.get_mut(&position) {
                Some(owner) if owner.as_str() <= node => {}
                Some(owner) => *owner = node.to_string(),
                None => {
                    self.ring.insert(position, node.to_string());
                }
            }
        }
    }

    fn publish(&self, event: RingEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}
