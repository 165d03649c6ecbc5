use std::collections::HashMap;

use crate::display_width::{single_line, truncate_to_width};
use crate::graph_layout::{MindmapLayout, PositionedNode};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutlineOptions {
    /// Maximum line width in columns; longer lines are cut with `…`.
    pub max_width: Option<usize>,
    pub descriptions: bool,
}

pub fn render(layout: &MindmapLayout) -> String {
    render_with(layout, &OutlineOptions::default())
}

/// Draw the visible part of a layout as an indented box-drawing outline.
pub fn render_with(layout: &MindmapLayout, options: &OutlineOptions) -> String {
    let mut children: HashMap<&str, Vec<&PositionedNode>> = HashMap::new();
    let mut roots = Vec::new();
    for node in &layout.nodes {
        match node.parent_id.as_deref() {
            Some(parent) => children.entry(parent).or_default().push(node),
            None => roots.push(node),
        }
    }

    let mut out = Outline {
        children,
        options,
        lines: Vec::new(),
    };
    for root in roots {
        out.push(node_text(root));
        out.description(root, "");
        out.subtree(root, "");
    }
    out.lines.join("\n")
}

struct Outline<'a> {
    children: HashMap<&'a str, Vec<&'a PositionedNode>>,
    options: &'a OutlineOptions,
    lines: Vec<String>,
}

impl<'a> Outline<'a> {
    fn push(&mut self, line: String) {
        let line = match self.options.max_width {
            Some(max) => truncate_to_width(&line, max),
            None => line,
        };
        self.lines.push(line);
    }

    fn description(&mut self, node: &PositionedNode, prefix: &str) {
        if !self.options.descriptions {
            return;
        }
        let Some(description) = node.description.as_deref() else {
            return;
        };
        let bar = if self.children.contains_key(node.id.as_str()) {
            "│ "
        } else {
            "  "
        };
        self.push(format!("{prefix}{bar}{}", single_line(description)));
    }

    fn subtree(&mut self, parent: &PositionedNode, prefix: &str) {
        let Some(kids) = self.children.get(parent.id.as_str()).cloned() else {
            return;
        };
        let count = kids.len();
        for (i, child) in kids.into_iter().enumerate() {
            let (branch, continuation) = if i + 1 == count {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            self.push(format!("{prefix}{branch}{}", node_text(child)));
            let next = format!("{prefix}{continuation}");
            self.description(child, &next);
            self.subtree(child, &next);
        }
    }
}

fn node_text(node: &PositionedNode) -> String {
    let marker = match (node.has_children, node.is_expanded) {
        (false, _) => "",
        (true, true) => "[-] ",
        (true, false) => "[+] ",
    };
    let focus = if node.is_focused { " ◀" } else { "" };
    format!("{marker}{}{focus}", single_line(&node.label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::ExpansionState;
    use crate::graph_ast::{Graph, GraphEdge, GraphNode};
    use crate::graph_layout::{LayoutConfig, compute};
    use crate::graph_tree::{GraphTree, build_tree};
    use pretty_assertions::assert_eq;

    fn sample() -> GraphTree {
        build_tree(&Graph::new(
            vec![
                GraphNode::new("r", "Root").with_description("The whole\ntopic"),
                GraphNode::new("a", "Alpha"),
                GraphNode::new("a1", "Alpha One").with_description("detail"),
                GraphNode::new("b", "Beta"),
            ],
            vec![
                GraphEdge::new("e0", "r", "a"),
                GraphEdge::new("e1", "a", "a1"),
                GraphEdge::new("e2", "r", "b"),
            ],
        ))
    }

    fn outline(state: &ExpansionState, options: &OutlineOptions) -> String {
        let layout = compute(&sample(), state, &LayoutConfig::default()).unwrap();
        render_with(&layout, options)
    }

    #[test]
    fn collapsed_branches_show_plus() {
        let tree = sample();
        let out = outline(&ExpansionState::for_tree(&tree), &OutlineOptions::default());
        assert_eq!(out, "[-] Root\n├── [+] Alpha\n└── Beta");
    }

    #[test]
    fn nested_branches_indent() {
        let tree = sample();
        let state = ExpansionState::for_tree(&tree).click(&tree, "a");
        let out = outline(&state, &OutlineOptions::default());
        assert_eq!(
            out,
            "[-] Root\n├── [-] Alpha ◀\n│   └── Alpha One\n└── Beta"
        );
    }

    #[test]
    fn descriptions_follow_their_node() {
        let tree = sample();
        let state = ExpansionState::for_tree(&tree).expand("a");
        let options = OutlineOptions {
            descriptions: true,
            ..OutlineOptions::default()
        };
        let out = outline(&state, &options);
        assert_eq!(
            out,
            "[-] Root\n│ The whole topic\n├── [-] Alpha\n│   └── Alpha One\n│         detail\n└── Beta"
        );
    }

    #[test]
    fn max_width_truncates_lines() {
        let tree = sample();
        let options = OutlineOptions {
            max_width: Some(10),
            ..OutlineOptions::default()
        };
        let out = outline(&ExpansionState::for_tree(&tree), &options);
        assert_eq!(out, "[-] Root\n├── [+] A…\n└── Beta");
    }
}
