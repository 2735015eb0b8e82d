//! Weighted call trees built from sampled stacks
//!
//! Nodes live in an arena; a child always has a larger id than its parent,
//! which lets total weights be computed in one reverse sweep.

use fnv::FnvHashMap;
use std::collections::VecDeque;

/// Index of a node inside its tree
pub type NodeId = usize;

/// Id of the root node of every tree
pub const ROOT: NodeId = 0;

/// Label of the root node
pub const ROOT_LABEL: &str = "";

/// Traversal event passed to [`CallTree::traverse_in_depth`] visitors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Enter,
    Exit,
}

/// A call tree node
#[derive(Debug, Clone)]
pub struct CallTreeNode {
    pub label: String,
    /// Number of paths ending at this node
    pub self_weight: u64,
    /// Self weight plus the total weight of all children; valid once totals
    /// have been computed
    pub total_weight: u64,
    pub parent: Option<NodeId>,
    children: Vec<NodeId>,
    index: FnvHashMap<String, NodeId>,
}

impl CallTreeNode {
    fn new(label: &str, parent: Option<NodeId>) -> Self {
        Self {
            label: label.to_string(),
            self_weight: 0,
            total_weight: 0,
            parent,
            children: Vec::new(),
            index: FnvHashMap::default(),
        }
    }

    /// Child ids in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Call graph with lazily computed total weights
#[derive(Debug, Clone)]
pub struct CallTree {
    nodes: Vec<CallTreeNode>,
    totals_computed: bool,
}

impl Default for CallTree {
    fn default() -> Self {
        Self {
            nodes: vec![CallTreeNode::new(ROOT_LABEL, None)],
            totals_computed: false,
        }
    }
}

impl CallTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &CallTreeNode {
        &self.nodes[ROOT]
    }

    pub fn node(&self, id: NodeId) -> &CallTreeNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut CallTreeNode {
        &mut self.nodes[id]
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Add one sample. The last label of `path` gets its self weight bumped.
    pub fn add_path<S: AsRef<str>>(&mut self, path: &[S]) {
        if path.is_empty() {
            return;
        }
        let mut current = ROOT;
        for label in path {
            current = self.find_or_add_child(current, label.as_ref());
        }
        self.nodes[current].self_weight += 1;
        self.totals_computed = false;
    }

    pub fn find_child(&self, parent: NodeId, label: &str) -> Option<NodeId> {
        self.nodes[parent].index.get(label).copied()
    }

    pub fn find_or_add_child(&mut self, parent: NodeId, label: &str) -> NodeId {
        if let Some(id) = self.find_child(parent, label) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(CallTreeNode::new(label, Some(parent)));
        let node = &mut self.nodes[parent];
        node.children.push(id);
        node.index.insert(label.to_string(), id);
        id
    }

    /// Child nodes of `id` in insertion order
    pub fn export_children(&self, id: NodeId) -> Vec<&CallTreeNode> {
        self.nodes[id]
            .children
            .iter()
            .map(|&child| &self.nodes[child])
            .collect()
    }

    /// Follow `labels` down from `from`
    pub fn descend_to_child<S: AsRef<str>>(&self, from: NodeId, labels: &[S]) -> Option<NodeId> {
        labels
            .iter()
            .try_fold(from, |current, label| self.find_child(current, label.as_ref()))
    }

    /// Ids from `id` up to and including the root
    pub fn walk_up_to_root(&self, id: NodeId) -> Vec<NodeId> {
        std::iter::successors(Some(id), |&current| self.nodes[current].parent).collect()
    }

    /// Merge every subtree rooted at a node labelled `label` into a new tree
    /// whose root has a single `label` child.
    pub fn clone_subtree(&self, label: &str) -> CallTree {
        let mut subtree = CallTree::new();
        self.traverse(|node, parent: Option<NodeId>| {
            if parent.is_none() && node.label != label {
                return None;
            }
            let child = subtree.find_or_add_child(parent.unwrap_or(ROOT), &node.label);
            subtree.nodes[child].self_weight += node.self_weight;
            Some(child)
        });
        subtree
    }

    /// Compute total weights unless they are already up to date
    pub fn compute_total_weights(&mut self) {
        if self.totals_computed {
            return;
        }
        for node in &mut self.nodes {
            node.total_weight = node.self_weight;
        }
        for id in (1..self.nodes.len()).rev() {
            let total = self.nodes[id].total_weight;
            if let Some(parent) = self.nodes[id].parent {
                self.nodes[parent].total_weight += total;
            }
        }
        self.totals_computed = true;
    }

    /// Declare the stored totals authoritative, e.g. for trees whose totals
    /// were accumulated by hand
    pub(crate) fn mark_totals_computed(&mut self) {
        self.totals_computed = true;
    }

    /// Breadth-first traversal. The visitor receives the value it returned
    /// for the node's parent (`None` for the root).
    pub fn traverse<T: Copy>(&self, mut visit: impl FnMut(&CallTreeNode, Option<T>) -> Option<T>) {
        let mut queue: VecDeque<(NodeId, Option<T>)> = VecDeque::new();
        queue.push_back((ROOT, None));
        while let Some((id, param)) = queue.pop_front() {
            let node = &self.nodes[id];
            let result = visit(node, param);
            queue.extend(node.children.iter().map(|&child| (child, result)));
        }
    }

    /// Depth-first traversal calling the visitor on entering and leaving
    /// every node
    pub fn traverse_in_depth(&self, mut visit: impl FnMut(&CallTreeNode, Visit)) {
        let mut stack = vec![(ROOT, Visit::Enter)];
        while let Some((id, event)) = stack.pop() {
            let node = &self.nodes[id];
            visit(node, event);
            if event == Visit::Enter {
                stack.push((id, Visit::Exit));
                stack.extend(node.children.iter().rev().map(|&child| (child, Visit::Enter)));
            }
        }
    }
}
