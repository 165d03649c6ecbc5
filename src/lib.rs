pub mod callback;
pub mod display_width;
pub mod error;
pub mod expansion;
pub mod graph_ast;
pub mod graph_layout;
pub mod graph_renderer;
pub mod graph_tree;
pub mod lifecycle;
pub mod normalize;
pub mod relayout;
pub mod service;
pub mod store;
pub mod view;

pub use error::{MindmapError, RequestFailure};
pub use graph_ast::{Graph, GraphEdge, GraphNode, Position};

use graph_renderer::OutlineOptions;
use view::MindmapView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Outline,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOptions {
    /// Node ids to expand on top of the root.
    pub expand: Vec<String>,
    pub expand_all: bool,
    pub title: Option<String>,
    pub max_width: Option<usize>,
    pub descriptions: bool,
    pub format: OutputFormat,
}

pub fn render(input: &str) -> Result<String, MindmapError> {
    render_with_options(input, &RenderOptions::default())
}

/// Normalize a payload, lay it out and draw it as an outline or as layout JSON.
pub fn render_with_options(input: &str, options: &RenderOptions) -> Result<String, MindmapError> {
    let graph = normalize::normalize_str(input)?;
    let mut view = MindmapView::new(&graph);
    if let Some(title) = &options.title {
        view = view.with_title(title.clone());
    }
    if options.expand_all {
        view.expand_all();
    }
    for id in &options.expand {
        view.expand(id);
    }

    let layout = view.layout()?;
    match options.format {
        OutputFormat::Outline => Ok(graph_renderer::render_with(
            &layout,
            &OutlineOptions {
                max_width: options.max_width,
                descriptions: options.descriptions,
            },
        )),
        OutputFormat::Json => serde_json::to_string_pretty(&layout)
            .map_err(|e| MindmapError::MalformedPayload(format!("could not encode layout: {e}"))),
    }
}
