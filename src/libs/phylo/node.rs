/// NodeId is an index into the Tree's node vector.
/// Ids are handed out in pre-order while the tree is built.
pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct Node {
    /// Index in the arena
    pub id: NodeId,

    /// Parent node ID (None for root)
    pub parent: Option<NodeId>,

    /// Child node IDs, in input order
    pub children: Vec<NodeId>,

    // --- Payload ---

    /// Node label
    pub name: Option<String>,

    /// Branch length to parent. The root keeps whatever the input gave it,
    /// but it is never used.
    pub length: Option<f64>,

    /// Number of leaves in the subtree rooted here
    pub leaf_count: usize,
}

impl Node {
    /// Create a new empty node with a specific ID
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            name: None,
            length: None,
            leaf_count: 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Branch length, with a missing value read as 0.
    pub fn branch_length(&self) -> f64 {
        self.length.unwrap_or(0.0)
    }

    /// The name used in output: the label, or `N<id>` for unnamed nodes.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("N{}", self.id),
        }
    }
}
