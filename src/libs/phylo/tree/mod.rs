pub mod io;
pub mod traversal;

use super::node::{Node, NodeId};

/// Rooted tree stored as an arena of nodes.
///
/// Trees come out of the parser fully built; the simulation code only reads
/// them.
#[derive(Debug, Default, Clone)]
pub struct Tree {
    /// Arena storage for all nodes
    pub(super) nodes: Vec<Node>,

    /// Optional root ID (a tree might be empty or in construction)
    pub(super) root: Option<NodeId>,
}

impl Tree {
    /// Create a new empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new node, linked as the last child of `parent` when one is
    /// given. Returns the new node's ID.
    pub fn add_node(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        let mut node = Node::new(id);
        if let Some(p) = parent.filter(|&p| p < id) {
            node.parent = Some(p);
            self.nodes[p].children.push(id);
        }
        self.nodes.push(node);
        id
    }

    /// Get number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get root ID
    pub fn get_root(&self) -> Option<NodeId> {
        self.root
    }

    /// Get a reference to a node by ID.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Set a node as the root of the tree.
    pub fn set_root(&mut self, id: NodeId) {
        if self.get_node(id).is_some() {
            self.root = Some(id);
        }
    }

    /// Fill `leaf_count` for every node reachable from the root.
    pub fn count_leaves(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        for id in traversal::postorder(self, root) {
            let count = if self.nodes[id].is_leaf() {
                1
            } else {
                self.nodes[id]
                    .children
                    .iter()
                    .map(|&c| self.nodes[c].leaf_count)
                    .sum::<usize>()
            };
            self.nodes[id].leaf_count = count;
        }
    }

    /// Pre-order from the root; empty for an empty tree.
    pub fn nodes_preorder(&self) -> Vec<NodeId> {
        self.root
            .map(|r| traversal::preorder(self, r))
            .unwrap_or_default()
    }

    /// Non-root nodes in pre-order. Position `i` in this list is branch `i`.
    pub fn branches(&self) -> Vec<NodeId> {
        self.nodes_preorder()
            .into_iter()
            .filter(|&id| Some(id) != self.root)
            .collect()
    }

    pub fn num_branches(&self) -> usize {
        self.len().saturating_sub(1)
    }

    pub fn get_leaves(&self) -> Vec<NodeId> {
        self.nodes_preorder()
            .into_iter()
            .filter(|&id| self.nodes[id].is_leaf())
            .collect()
    }

    pub fn num_leaves(&self) -> usize {
        self.root.map(|r| self.nodes[r].leaf_count).unwrap_or(0)
    }

    /// Output name of a node, `N<id>` when unnamed.
    pub fn label(&self, id: NodeId) -> String {
        self.nodes
            .get(id)
            .map(|n| n.label())
            .unwrap_or_else(|| format!("N{}", id))
    }

    // --- Delegation to io ---

    pub fn from_file(infile: &str) -> crate::libs::error::Result<Tree> {
        io::from_file(infile)
    }
}
