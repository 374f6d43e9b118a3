use super::types::{KeyHash, NodeHash};

/// Sorted set of node hashes.
///
/// The ring never holds duplicates: `add` of an existing member is a no-op, so
/// repeated membership updates converge on the same view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistentHashRing {
    nodes: Vec<NodeHash>,
}

impl ConsistentHashRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeHash>,
    {
        let mut ring = Self::new();
        for node in nodes {
            ring.add(node);
        }
        ring
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: &NodeHash) -> bool {
        self.nodes.binary_search(node).is_ok()
    }

    pub fn nodes(&self) -> &[NodeHash] {
        &self.nodes
    }

    pub fn add(&mut self, node: NodeHash) {
        if node.is_empty() {
            return;
        }
        if let Err(position) = self.nodes.binary_search(&node) {
            self.nodes.insert(position, node);
        }
    }

    /// Returns `true` if the node was a member and has been removed.
    pub fn remove(&mut self, node: &NodeHash) -> bool {
        match self.nodes.binary_search(node) {
            Ok(position) => {
                self.nodes.remove(position);
                true
            }
            Err(_) => false,
        }
    }

    /// The `min(num_replicas, len)` nodes clockwise of `key`, starting at the
    /// first node whose hash is `>= key` and wrapping to the start of the ring.
    pub fn responsible_nodes(&self, key: &KeyHash, num_replicas: usize) -> Vec<NodeHash> {
        if self.nodes.is_empty() || key.is_empty() {
            return Vec::new();
        }

        let primary = self
            .nodes
            .partition_point(|node| node.as_str() < key.as_str());
        let count = num_replicas.min(self.nodes.len());

        (primary..primary + count)
            .map(|position| self.nodes[position % self.nodes.len()].clone())
            .collect()
    }
}
