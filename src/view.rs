use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use tracing::{debug, error};

use crate::error::MindmapError;
use crate::expansion::{DiscussionRequest, ExpansionState};
use crate::graph_ast::Graph;
use crate::graph_layout::{self, LayoutConfig, MindmapLayout};
use crate::graph_tree::{GraphTree, TreeConfig, build_tree_with};
use crate::normalize;

/// What the host should draw for the current graph.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutcome {
    Ready(MindmapLayout),
    NoData { message: String },
    NoNodes { message: String },
    Failed { message: String, retryable: bool },
}

impl ViewOutcome {
    pub fn layout(&self) -> Option<&MindmapLayout> {
        match self {
            ViewOutcome::Ready(layout) => Some(layout),
            _ => None,
        }
    }

    fn from_error(err: &MindmapError) -> Self {
        match err {
            MindmapError::MalformedPayload(_) => ViewOutcome::NoData {
                message: err.user_message(),
            },
            MindmapError::EmptyGraph => ViewOutcome::NoNodes {
                message: err.user_message(),
            },
            _ => ViewOutcome::Failed {
                message: err.user_message(),
                retryable: err.is_retryable(),
            },
        }
    }
}

/// Owns one loaded graph together with its interaction state.
#[derive(Debug, Clone)]
pub struct MindmapView {
    tree: GraphTree,
    state: ExpansionState,
    tree_config: TreeConfig,
    layout_config: LayoutConfig,
    title: Option<String>,
}

impl MindmapView {
    pub fn new(graph: &Graph) -> Self {
        Self::with_config(graph, TreeConfig::default(), LayoutConfig::default())
    }

    pub fn with_config(graph: &Graph, tree_config: TreeConfig, layout_config: LayoutConfig) -> Self {
        let tree = build_tree_with(graph, &tree_config);
        let state = ExpansionState::for_tree(&tree);
        Self {
            tree,
            state,
            tree_config,
            layout_config,
            title: None,
        }
    }

    pub fn from_payload(payload: &Value) -> Result<Self, MindmapError> {
        Ok(Self::new(&normalize::normalize(payload)?))
    }

    /// Show `title` on the root box instead of the root's own label.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn tree(&self) -> &GraphTree {
        &self.tree
    }

    pub fn state(&self) -> &ExpansionState {
        &self.state
    }

    /// Replace the graph; interaction state starts over.
    pub fn load(&mut self, graph: &Graph) {
        self.tree = build_tree_with(graph, &self.tree_config);
        self.state = ExpansionState::for_tree(&self.tree);
        debug!(nodes = self.tree.len(), "loaded graph into view");
    }

    pub fn set_state(&mut self, state: ExpansionState) {
        self.state = state;
    }

    pub fn click(&mut self, id: &str) -> Option<DiscussionRequest> {
        self.state = self.state.click(&self.tree, id);
        let mut request = DiscussionRequest::for_node(&self.tree, id)?;
        if self.tree.root_id() == Some(id) {
            if let Some(title) = &self.title {
                request = DiscussionRequest {
                    prompt: format!("Discuss what these sources say about: {title}."),
                    topic: title.clone(),
                    ..request
                };
            }
        }
        Some(request)
    }

    pub fn click_pane(&mut self) {
        self.state = self.state.click_pane();
    }

    pub fn hover(&mut self, id: &str) {
        self.state = self.state.hover(id);
    }

    pub fn unhover(&mut self) {
        self.state = self.state.unhover();
    }

    pub fn navigate(&mut self, id: &str) {
        self.state = self.state.navigate(&self.tree, id);
    }

    pub fn expand(&mut self, id: &str) {
        self.state = self.state.expand(id);
    }

    pub fn expand_all(&mut self) {
        self.state = self.state.expand_all(&self.tree);
    }

    pub fn layout(&self) -> Result<MindmapLayout, MindmapError> {
        let mut layout = graph_layout::compute(&self.tree, &self.state, &self.layout_config)?;
        if let Some(title) = &self.title {
            if let Some(root) = layout.nodes.iter_mut().find(|n| n.is_root) {
                root.label = title.clone();
            }
        }
        Ok(layout)
    }

    /// Layout behind a fault barrier: errors and panics both become a
    /// drawable outcome.
    pub fn outcome(&self) -> ViewOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.layout())) {
            Ok(Ok(layout)) => ViewOutcome::Ready(layout),
            Ok(Err(err)) => ViewOutcome::from_error(&err),
            Err(cause) => {
                let message = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(%message, "mindmap layout panicked");
                ViewOutcome::Failed {
                    message: "Something went wrong while drawing the mindmap.".to_string(),
                    retryable: true,
                }
            }
        }
    }
}

/// Outcome for a raw payload, for hosts that have not built a view yet.
pub fn outcome_for_payload(payload: &Value) -> ViewOutcome {
    match MindmapView::from_payload(payload) {
        Ok(view) => view.outcome(),
        Err(err) => ViewOutcome::from_error(&err),
    }
}
