use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::graph_ast::*;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeConfig {
    /// Children kept per node; the rest are dropped, not queued.
    pub max_children: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self { max_children: 8 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    pub node: GraphNode,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub depth: usize,
}

impl TreeEntry {
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Rooted, acyclic view of a canonical graph.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphTree {
    root: Option<String>,
    /// Retained nodes, in the original node order.
    entries: Vec<TreeEntry>,
    index: HashMap<String, usize>,
    /// Breadth-first order from the root.
    order: Vec<String>,
    edges: Vec<GraphEdge>,
}

impl GraphTree {
    pub fn root_id(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn root(&self) -> Option<&TreeEntry> {
        self.root.as_deref().and_then(|id| self.get(id))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &str) -> Option<&TreeEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.entries.iter().map(|e| &e.node)
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn breadth_first(&self) -> &[String] {
        &self.order
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.get(id).map(|e| e.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(|e| e.parent.as_deref())
    }

    pub fn has_children(&self, id: &str) -> bool {
        self.get(id).is_some_and(TreeEntry::has_children)
    }

    pub fn depth(&self, id: &str) -> Option<usize> {
        self.get(id).map(|e| e.depth)
    }

    /// Root-to-node chain, inclusive. Empty when `id` is not in the tree.
    pub fn ancestry(&self, id: &str) -> Vec<String> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut path = vec![id.to_string()];
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            path.push(parent.to_string());
            current = parent;
        }
        path.reverse();
        path
    }

    /// The root, every ancestor of `id`, `id` itself and all its descendants.
    pub fn related_ids(&self, id: &str) -> HashSet<String> {
        let mut related: HashSet<String> = self.ancestry(id).into_iter().collect();
        if related.is_empty() {
            return related;
        }
        if let Some(root) = &self.root {
            related.insert(root.clone());
        }
        let mut pending: Vec<&str> = self.children(id).iter().map(String::as_str).collect();
        while let Some(next) = pending.pop() {
            related.insert(next.to_string());
            pending.extend(self.children(next).iter().map(String::as_str));
        }
        related
    }
}

pub fn build_tree(graph: &Graph) -> GraphTree {
    build_tree_with(graph, &TreeConfig::default())
}

pub fn build_tree_with(graph: &Graph, config: &TreeConfig) -> GraphTree {
    let Some(root) = select_root(graph) else {
        return GraphTree::default();
    };

    let known: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut outgoing: HashMap<&str, Vec<&GraphEdge>> = HashMap::new();
    for edge in &graph.edges {
        if known.contains(edge.target.as_str()) {
            outgoing.entry(edge.source.as_str()).or_default().push(edge);
        }
    }

    let mut visited: HashSet<&str> = HashSet::from([root]);
    let mut parents: HashMap<&str, &str> = HashMap::new();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut depths: HashMap<&str, usize> = HashMap::from([(root, 0)]);
    let mut tree_edges: HashMap<(&str, &str), &GraphEdge> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut queue: VecDeque<&str> = VecDeque::from([root]);

    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());
        let depth = depths[current];

        let mut kept: Vec<&str> = Vec::new();
        let mut dropped = 0usize;
        for edge in outgoing.get(current).map(Vec::as_slice).unwrap_or(&[]) {
            let target = edge.target.as_str();
            if visited.contains(target) || kept.contains(&target) {
                continue;
            }
            if kept.len() == config.max_children {
                dropped += 1;
                continue;
            }
            kept.push(target);
            tree_edges.insert((current, target), edge);
        }
        if dropped > 0 {
            debug!(node = current, dropped, "child cap reached, dropping excess children");
        }

        for &child in &kept {
            visited.insert(child);
            parents.insert(child, current);
            depths.insert(child, depth + 1);
            queue.push_back(child);
        }
        children.insert(current, kept);
    }

    let mut entries: Vec<TreeEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for node in &graph.nodes {
        let id = node.id.as_str();
        if !visited.contains(id) || index.contains_key(id) {
            continue;
        }
        let mut node = node.clone();
        node.is_root = id == root;
        index.insert(node.id.clone(), entries.len());
        entries.push(TreeEntry {
            node,
            parent: parents.get(id).map(|p| p.to_string()),
            children: children
                .get(id)
                .map(|c| c.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
            depth: depths[id],
        });
    }

    // Only the first edge per parent/child pair survives, in original edge order.
    let edges: Vec<GraphEdge> = graph
        .edges
        .iter()
        .filter(|edge| {
            tree_edges
                .get(&(edge.source.as_str(), edge.target.as_str()))
                .is_some_and(|kept| std::ptr::eq(*kept, *edge))
        })
        .cloned()
        .collect();

    debug!(
        root,
        nodes = entries.len(),
        edges = edges.len(),
        excluded = graph.nodes.len() - entries.len(),
        "built tree"
    );

    GraphTree {
        root: Some(root.to_string()),
        entries,
        index,
        order,
        edges,
    }
}

/// Explicit root flag, else the first node nothing points at, else the first node.
fn select_root(graph: &Graph) -> Option<&str> {
    if let Some(flagged) = graph.nodes.iter().find(|n| n.is_root) {
        return Some(flagged.id.as_str());
    }
    let targets: HashSet<&str> = graph.edges.iter().map(|e| e.target.as_str()).collect();
    graph
        .nodes
        .iter()
        .find(|n| !targets.contains(n.id.as_str()))
        .or_else(|| graph.nodes.first())
        .map(|n| n.id.as_str())
}
