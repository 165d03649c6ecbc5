use im::{OrdSet, Vector};

use crate::graph_tree::GraphTree;

/// Interaction state for one loaded graph. Every transition returns a new
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExpansionState {
    expanded: OrdSet<String>,
    focused: Option<String>,
    navigation_path: Vector<String>,
    visited: OrdSet<String>,
    hovered: Option<String>,
}

impl ExpansionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_tree(tree: &GraphTree) -> Self {
        let state = Self::new();
        match tree.root_id() {
            Some(root) => state.expand(root),
            None => state,
        }
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    pub fn is_visited(&self, id: &str) -> bool {
        self.visited.contains(id)
    }

    pub fn expanded(&self) -> &OrdSet<String> {
        &self.expanded
    }

    pub fn visited(&self) -> &OrdSet<String> {
        &self.visited
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn hovered(&self) -> Option<&str> {
        self.hovered.as_deref()
    }

    pub fn navigation_path(&self) -> &Vector<String> {
        &self.navigation_path
    }

    /// Toggle expansion, focus the node and mark it visited. An expanded
    /// root stays expanded.
    pub fn click(&self, tree: &GraphTree, id: &str) -> Self {
        if !tree.contains(id) {
            return self.clone();
        }
        let is_root = tree.root_id() == Some(id);
        let expanded = if self.is_expanded(id) {
            if is_root {
                self.expanded.clone()
            } else {
                self.expanded.without(id)
            }
        } else {
            self.expanded.update(id.to_string())
        };

        Self {
            expanded,
            visited: self.visited.update(id.to_string()),
            ..self.focus(tree, id)
        }
    }

    pub fn click_pane(&self) -> Self {
        Self {
            focused: None,
            navigation_path: Vector::new(),
            hovered: None,
            ..self.clone()
        }
    }

    pub fn hover(&self, id: &str) -> Self {
        Self {
            hovered: Some(id.to_string()),
            ..self.clone()
        }
    }

    pub fn unhover(&self) -> Self {
        Self {
            hovered: None,
            ..self.clone()
        }
    }

    // Refocus without touching expansion.
    pub fn navigate(&self, tree: &GraphTree, id: &str) -> Self {
        if !tree.contains(id) {
            return self.clone();
        }
        self.focus(tree, id)
    }

    pub fn expand(&self, id: &str) -> Self {
        Self {
            expanded: self.expanded.update(id.to_string()),
            ..self.clone()
        }
    }

    pub fn expand_all(&self, tree: &GraphTree) -> Self {
        let mut expanded = self.expanded.clone();
        for entry in tree.entries().iter().filter(|e| e.has_children()) {
            expanded.insert(entry.node.id.clone());
        }
        Self {
            expanded,
            ..self.clone()
        }
    }

    pub fn exploration_progress(&self, tree: &GraphTree) -> f64 {
        if tree.is_empty() {
            return 0.0;
        }
        let visited = tree.nodes().filter(|n| self.is_visited(&n.id)).count();
        visited as f64 / tree.len() as f64
    }

    fn focus(&self, tree: &GraphTree, id: &str) -> Self {
        Self {
            focused: Some(id.to_string()),
            navigation_path: Vector::from(tree.ancestry(id)),
            ..self.clone()
        }
    }
}

/// The "discuss this topic" request a node click hands to the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscussionRequest {
    pub node_id: String,
    pub topic: String,
    pub prompt: String,
}

impl DiscussionRequest {
    pub fn for_node(tree: &GraphTree, id: &str) -> Option<Self> {
        let entry = tree.get(id)?;
        let topic = entry.node.label.clone();
        Some(Self {
            node_id: id.to_string(),
            prompt: format!("Discuss what these sources say about: {topic}."),
            topic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_ast::{Graph, GraphEdge, GraphNode};
    use crate::graph_tree::build_tree;
    use pretty_assertions::assert_eq;

    fn sample() -> GraphTree {
        build_tree(&Graph::new(
            vec![
                GraphNode::new("r", "Root").root(),
                GraphNode::new("a", "Alpha"),
                GraphNode::new("a1", "Alpha One"),
                GraphNode::new("b", "Beta"),
            ],
            vec![
                GraphEdge::new("e0", "r", "a"),
                GraphEdge::new("e1", "a", "a1"),
                GraphEdge::new("e2", "r", "b"),
            ],
        ))
    }

    fn path(state: &ExpansionState) -> Vec<&str> {
        state.navigation_path().iter().map(String::as_str).collect()
    }

    #[test]
    fn new_tree_auto_expands_root_only() {
        let state = ExpansionState::for_tree(&sample());
        assert!(state.is_expanded("r"));
        assert_eq!(state.expanded().len(), 1);
        assert_eq!(state.focused(), None);
        assert!(state.visited().is_empty());
    }

    #[test]
    fn click_toggles_and_focuses() {
        let tree = sample();
        let state = ExpansionState::for_tree(&tree).click(&tree, "a");
        assert!(state.is_expanded("a"));
        assert_eq!(state.focused(), Some("a"));
        assert_eq!(path(&state), vec!["r", "a"]);
        assert!(state.is_visited("a"));

        let state = state.click(&tree, "a");
        assert!(!state.is_expanded("a"));
        assert!(state.is_visited("a"));
    }

    #[test]
    fn clicking_expanded_root_keeps_it_expanded() {
        let tree = sample();
        let state = ExpansionState::for_tree(&tree).click(&tree, "r");
        assert!(state.is_expanded("r"));
        assert_eq!(state.focused(), Some("r"));
        assert_eq!(path(&state), vec!["r"]);
        assert!(state.is_visited("r"));
    }

    #[test]
    fn transitions_leave_the_original_untouched() {
        let tree = sample();
        let before = ExpansionState::for_tree(&tree);
        let after = before.click(&tree, "a");
        assert!(!before.is_expanded("a"));
        assert_ne!(before, after);
    }

    #[test]
    fn pane_click_clears_focus_but_keeps_history() {
        let tree = sample();
        let state = ExpansionState::for_tree(&tree)
            .click(&tree, "a")
            .hover("a1")
            .click_pane();
        assert_eq!(state.focused(), None);
        assert_eq!(state.hovered(), None);
        assert!(state.navigation_path().is_empty());
        assert!(state.is_expanded("a"));
        assert!(state.is_visited("a"));
    }

    #[test]
    fn hover_is_independent() {
        let state = ExpansionState::new().hover("b");
        assert_eq!(state.hovered(), Some("b"));
        assert_eq!(state.unhover().hovered(), None);
        assert!(state.expanded().is_empty());
    }

    #[test]
    fn navigate_refocuses_without_expanding() {
        let tree = sample();
        let state = ExpansionState::for_tree(&tree).navigate(&tree, "a1");
        assert_eq!(state.focused(), Some("a1"));
        assert_eq!(path(&state), vec!["r", "a", "a1"]);
        assert!(!state.is_expanded("a1"));
        assert!(!state.is_visited("a1"));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let tree = sample();
        let state = ExpansionState::for_tree(&tree);
        assert_eq!(state.click(&tree, "ghost"), state);
        assert_eq!(state.navigate(&tree, "ghost"), state);
    }

    #[test]
    fn expand_all_opens_every_parent() {
        let tree = sample();
        let state = ExpansionState::new().expand_all(&tree);
        let expanded: Vec<&str> = state.expanded().iter().map(String::as_str).collect();
        assert_eq!(expanded, vec!["a", "r"]);
    }

    #[test]
    fn exploration_progress_counts_visited_nodes() {
        let tree = sample();
        let state = ExpansionState::for_tree(&tree)
            .click(&tree, "a")
            .click(&tree, "b");
        assert_eq!(state.exploration_progress(&tree), 0.5);
        assert_eq!(ExpansionState::new().exploration_progress(&GraphTree::default()), 0.0);
    }

    #[test]
    fn discussion_prompt_names_the_topic() {
        let request = DiscussionRequest::for_node(&sample(), "b").unwrap();
        assert_eq!(request.prompt, "Discuss what these sources say about: Beta.");
        assert!(DiscussionRequest::for_node(&sample(), "ghost").is_none());
    }
}
