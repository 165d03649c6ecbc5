use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

use crate::error::MindmapError;
use crate::expansion::ExpansionState;
use crate::graph_layout::{self, LayoutConfig, MindmapLayout};
use crate::graph_tree::GraphTree;

/// Bursts of state changes closer together than this produce one layout.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutFrame {
    /// Zero for the initial frame, then one per published layout.
    pub sequence: u64,
    pub state: ExpansionState,
    pub layout: Result<MindmapLayout, MindmapError>,
}

/// Background worker that recomputes the layout for the latest submitted
/// state.
pub struct Relayout {
    input: mpsc::UnboundedSender<ExpansionState>,
    frames: watch::Receiver<LayoutFrame>,
    task: JoinHandle<()>,
}

impl Relayout {
    pub fn spawn(tree: Arc<GraphTree>, config: LayoutConfig, initial: ExpansionState) -> Self {
        Self::spawn_with_window(tree, config, initial, DEBOUNCE_WINDOW)
    }

    pub fn spawn_with_window(
        tree: Arc<GraphTree>,
        config: LayoutConfig,
        initial: ExpansionState,
        window: Duration,
    ) -> Self {
        let first = LayoutFrame {
            sequence: 0,
            layout: graph_layout::compute(&tree, &initial, &config),
            state: initial,
        };
        let (input, rx) = mpsc::unbounded_channel();
        let (tx, frames) = watch::channel(first);
        let task = tokio::spawn(run(tree, config, rx, tx, window));
        Self {
            input,
            frames,
            task,
        }
    }

    /// Queue a state; returns false once the worker has stopped.
    pub fn submit(&self, state: ExpansionState) -> bool {
        self.input.send(state).is_ok()
    }

    pub fn subscribe(&self) -> watch::Receiver<LayoutFrame> {
        self.frames.clone()
    }

    pub fn latest(&self) -> LayoutFrame {
        self.frames.borrow().clone()
    }

    /// Flush anything pending and stop the worker.
    pub async fn shutdown(self) -> LayoutFrame {
        let Relayout {
            input,
            frames,
            task,
        } = self;
        drop(input);
        if let Err(err) = task.await {
            debug!(%err, "relayout worker ended abnormally");
        }
        frames.borrow().clone()
    }
}

async fn run(
    tree: Arc<GraphTree>,
    config: LayoutConfig,
    mut rx: mpsc::UnboundedReceiver<ExpansionState>,
    tx: watch::Sender<LayoutFrame>,
    window: Duration,
) {
    let mut sequence = 0u64;

    while let Some(mut latest) = rx.recv().await {
        let deadline = Instant::now() + window;
        let mut coalesced = 0usize;
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(state) => {
                        latest = state;
                        coalesced += 1;
                    }
                    None => break,
                },
                _ = sleep_until(deadline) => break,
            }
        }

        sequence += 1;
        trace!(sequence, coalesced, "recomputing layout");
        let layout = graph_layout::compute(&tree, &latest, &config);
        let frame = LayoutFrame {
            sequence,
            state: latest,
            layout,
        };
        if tx.send(frame).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_ast::{Graph, GraphEdge, GraphNode};
    use crate::graph_tree::build_tree;
    use pretty_assertions::assert_eq;

    fn tree() -> Arc<GraphTree> {
        Arc::new(build_tree(&Graph::new(
            vec![
                GraphNode::new("r", "Root"),
                GraphNode::new("a", "A"),
                GraphNode::new("a1", "A1"),
                GraphNode::new("b", "B"),
                GraphNode::new("b1", "B1"),
            ],
            vec![
                GraphEdge::new("e0", "r", "a"),
                GraphEdge::new("e1", "r", "b"),
                GraphEdge::new("e2", "a", "a1"),
                GraphEdge::new("e3", "b", "b1"),
            ],
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn initial_frame_is_available_immediately() {
        let tree = tree();
        let relayout = Relayout::spawn(tree.clone(), LayoutConfig::default(), ExpansionState::for_tree(&tree));
        let frame = relayout.latest();
        assert_eq!(frame.sequence, 0);
        assert_eq!(frame.layout.unwrap().nodes.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_collapse_into_one_frame() {
        let tree = tree();
        let base = ExpansionState::for_tree(&tree);
        let relayout = Relayout::spawn(tree.clone(), LayoutConfig::default(), base.clone());
        let mut frames = relayout.subscribe();
        frames.borrow_and_update();

        let opened_a = base.expand("a");
        let opened_both = opened_a.expand("b");
        assert!(relayout.submit(base.hover("a")));
        assert!(relayout.submit(opened_a));
        assert!(relayout.submit(opened_both.clone()));

        frames.changed().await.unwrap();
        let frame = frames.borrow_and_update().clone();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.state, opened_both);
        assert_eq!(frame.layout.unwrap().nodes.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_updates_each_publish() {
        let tree = tree();
        let base = ExpansionState::for_tree(&tree);
        let relayout = Relayout::spawn(tree.clone(), LayoutConfig::default(), base.clone());

        relayout.submit(base.expand("a"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(relayout.latest().sequence, 1);

        relayout.submit(base.expand("b"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let frame = relayout.latest();
        assert_eq!(frame.sequence, 2);
        assert!(frame.state.is_expanded("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_pending_state() {
        let tree = tree();
        let base = ExpansionState::for_tree(&tree);
        let relayout = Relayout::spawn(tree.clone(), LayoutConfig::default(), base.clone());
        relayout.submit(base.expand("a"));
        let last = relayout.shutdown().await;
        assert_eq!(last.sequence, 1);
        assert!(last.state.is_expanded("a"));
    }
}
