use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::error::MindmapError;
use crate::expansion::ExpansionState;
use crate::graph_ast::Position;
use crate::graph_tree::{GraphTree, TreeEntry};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoxSize {
    pub width: f64,
    pub height: f64,
}

impl BoxSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Pixel constants for the left-to-right layered layout.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
    pub root_x: f64,
    pub root_box: BoxSize,
    pub primary_x: f64,
    pub primary_box: BoxSize,
    pub primary_gutter: f64,
    pub nested_box: BoxSize,
    /// Horizontal step from a level-2+ node's parent column.
    pub nested_x_offset: f64,
    pub nested_gutter: f64,
    pub viewport_height: f64,
    /// Caps how many of the root's children are laid out.
    pub max_primary_branches: Option<usize>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            root_x: 100.0,
            root_box: BoxSize::new(1080.0, 216.0),
            primary_x: 1400.0,
            primary_box: BoxSize::new(900.0, 180.0),
            primary_gutter: 250.0,
            nested_box: BoxSize::new(720.0, 156.0),
            nested_x_offset: 1200.0,
            nested_gutter: 200.0,
            viewport_height: 918.0,
            max_primary_branches: None,
        }
    }
}

impl LayoutConfig {
    pub fn box_size(&self, level: usize) -> BoxSize {
        match level {
            0 => self.root_box,
            1 => self.primary_box,
            _ => self.nested_box,
        }
    }

    pub fn gutter(&self, level: usize) -> f64 {
        match level {
            0 => 0.0,
            1 => self.primary_gutter,
            _ => self.nested_gutter,
        }
    }

    fn slot(&self, level: usize) -> f64 {
        self.box_size(level).height + self.gutter(level)
    }

    fn column_x(&self, level: usize, parent_x: f64) -> f64 {
        match level {
            0 => self.root_x,
            1 => self.primary_x,
            _ => parent_x + self.nested_x_offset,
        }
    }
}

/// A visible node. `position.x` is the box's left edge, `position.y` its
/// vertical center.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionedNode {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub level: usize,
    pub branch_index: usize,
    pub parent_id: Option<String>,
    pub has_children: bool,
    pub is_expanded: bool,
    pub is_visible: bool,
    pub is_root: bool,
    pub is_hovered: bool,
    pub is_focused: bool,
    pub size: BoxSize,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionedEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub level: usize,
    pub branch_index: usize,
    pub is_highlighted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    fn of(nodes: &[PositionedNode]) -> Self {
        let mut bounds = Bounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for node in nodes {
            let half = node.size.height / 2.0;
            bounds.min_x = bounds.min_x.min(node.position.x);
            bounds.max_x = bounds.max_x.max(node.position.x + node.size.width);
            bounds.min_y = bounds.min_y.min(node.position.y - half);
            bounds.max_y = bounds.max_y.max(node.position.y + half);
        }
        bounds
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MindmapLayout {
    pub nodes: Vec<PositionedNode>,
    pub edges: Vec<PositionedEdge>,
    pub bounds: Bounds,
}

impl MindmapLayout {
    pub fn node(&self, id: &str) -> Option<&PositionedNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }
}

pub fn compute(
    tree: &GraphTree,
    state: &ExpansionState,
    config: &LayoutConfig,
) -> Result<MindmapLayout, MindmapError> {
    if tree.is_empty() {
        return Err(MindmapError::EmptyGraph);
    }

    let extents = compute_extents(tree, state, config);
    let nodes = place_nodes(tree, state, &extents, config);
    let edges = visible_edges(tree, state, &nodes);
    let bounds = Bounds::of(&nodes);

    Ok(MindmapLayout {
        nodes,
        edges,
        bounds,
    })
}

/// Bottom-up pass: vertical space each expanded subtree needs below its node.
/// Collapsed nodes and leaves reserve nothing.
pub fn compute_extents(
    tree: &GraphTree,
    state: &ExpansionState,
    config: &LayoutConfig,
) -> HashMap<String, f64> {
    let mut extents: HashMap<String, f64> = HashMap::with_capacity(tree.len());

    // Reverse breadth-first order visits every child before its parent.
    for id in tree.breadth_first().iter().rev() {
        let children = laid_out_children(tree, id, config);
        let extent = if !state.is_expanded(id) || children.is_empty() {
            0.0
        } else {
            let level = tree.depth(id).unwrap_or(0) + 1;
            let slot = config.slot(level);
            let nested: Vec<f64> = children
                .iter()
                .map(|child| extents.get(child).copied().unwrap_or(0.0))
                .collect();
            if nested.iter().all(|e| *e == 0.0) {
                slot * children.len() as f64
            } else {
                nested.iter().map(|e| slot + e).sum()
            }
        };
        extents.insert(id.clone(), extent);
    }

    extents
}

/// Top-down pass: stack each expanded node's children in contiguous slots
/// centered on the parent.
pub fn place_nodes(
    tree: &GraphTree,
    state: &ExpansionState,
    extents: &HashMap<String, f64>,
    config: &LayoutConfig,
) -> Vec<PositionedNode> {
    let Some(root) = tree.root() else {
        return Vec::new();
    };

    let root_position = Position::new(config.root_x, config.viewport_height / 2.0);
    let mut placed = vec![positioned(root, 0, 0, root_position, state, config)];
    let mut queue: VecDeque<(&str, Position, usize, Option<usize>)> =
        VecDeque::from([(root.node.id.as_str(), root_position, 0, None)]);

    while let Some((id, at, level, branch)) = queue.pop_front() {
        if !state.is_expanded(id) {
            continue;
        }
        let children = laid_out_children(tree, id, config);
        if children.is_empty() {
            continue;
        }

        let child_level = level + 1;
        let slot = config.slot(child_level);
        let heights: Vec<f64> = children
            .iter()
            .map(|child| slot + extents.get(child).copied().unwrap_or(0.0))
            .collect();
        let total: f64 = heights.iter().sum();
        let child_x = config.column_x(child_level, at.x);
        let mut cursor = at.y - total / 2.0;

        for (index, (child, height)) in children.iter().zip(&heights).enumerate() {
            let child_at = Position::new(child_x, cursor + height / 2.0);
            cursor += height;
            let Some(entry) = tree.get(child) else {
                continue;
            };
            // Level-1 nodes start a branch; deeper nodes inherit it.
            let child_branch = branch.unwrap_or(index);
            placed.push(positioned(entry, child_level, child_branch, child_at, state, config));
            queue.push_back((child.as_str(), child_at, child_level, Some(child_branch)));
        }
    }

    placed
}

fn laid_out_children<'t>(tree: &'t GraphTree, id: &str, config: &LayoutConfig) -> &'t [String] {
    let children = tree.children(id);
    match config.max_primary_branches {
        Some(cap) if tree.root_id() == Some(id) && children.len() > cap => &children[..cap],
        _ => children,
    }
}

fn positioned(
    entry: &TreeEntry,
    level: usize,
    branch_index: usize,
    position: Position,
    state: &ExpansionState,
    config: &LayoutConfig,
) -> PositionedNode {
    let id = entry.node.id.as_str();
    PositionedNode {
        id: id.to_string(),
        label: entry.node.label.clone(),
        description: entry.node.description.clone(),
        level,
        branch_index,
        parent_id: entry.parent.clone(),
        has_children: entry.has_children(),
        is_expanded: state.is_expanded(id),
        is_visible: true,
        is_root: level == 0,
        is_hovered: state.hovered() == Some(id),
        is_focused: state.focused() == Some(id),
        size: config.box_size(level),
        position,
    }
}

fn visible_edges(
    tree: &GraphTree,
    state: &ExpansionState,
    nodes: &[PositionedNode],
) -> Vec<PositionedEdge> {
    let ids: HashMap<(&str, &str), &str> = tree
        .edges()
        .iter()
        .map(|e| ((e.source.as_str(), e.target.as_str()), e.id.as_str()))
        .collect();
    let hovered = state.hovered();

    nodes
        .iter()
        .filter_map(|node| {
            let source = node.parent_id.as_deref()?;
            let target = node.id.as_str();
            let id = ids
                .get(&(source, target))
                .map(|id| id.to_string())
                .unwrap_or_else(|| format!("e-{source}-{target}"));
            Some(PositionedEdge {
                id,
                source: source.to_string(),
                target: target.to_string(),
                level: node.level,
                branch_index: node.branch_index,
                is_highlighted: hovered == Some(source) || hovered == Some(target),
            })
        })
        .collect()
}
