use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::MindmapError;
use crate::graph_ast::*;

const DEFAULT_LABEL: &str = "Node";
const MAX_UNWRAP_DEPTH: usize = 8;
const RESERVED_DATA_KEYS: &[&str] = &["label", "description", "isRoot"];
const CONTAINER_KEYS: &[&str] = &["root", "output", "elements", "nodes", "mindmap_data"];

/// Which external shape a payload was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// `[{id, parentId, data}, ...]`
    ParentList,
    /// `{root: {...}}` or `{output: {root: {...}}}`
    Hierarchy,
    /// `{elements: [...]}`
    Elements,
    /// `{nodes: [...], edges: [...]}`
    Canonical,
}

/// Structural classification of a raw payload, tried in priority order.
#[derive(Debug)]
enum Shape<'a> {
    ParentList(&'a [Value]),
    Hierarchy(&'a Value),
    Elements(&'a [Value]),
    Canonical { nodes: &'a [Value], edges: &'a [Value] },
    Wrapped(&'a Value),
    Envelope(&'a Value),
    Encoded(&'a str),
    Unrecognized(String),
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    id: Value,
    #[serde(default, rename = "parentId", alias = "parent_id")]
    parent_id: Value,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    label: Value,
    #[serde(default)]
    description: Value,
    #[serde(default)]
    position: Value,
    #[serde(default, rename = "type")]
    node_type: Value,
}

#[derive(Debug, Deserialize)]
struct RawEdge {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    source: Value,
    #[serde(default)]
    target: Value,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

pub fn normalize_str(input: &str) -> Result<Graph, MindmapError> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| MindmapError::MalformedPayload(format!("invalid JSON: {e}")))?;
    normalize(&value)
}

pub fn normalize(value: &Value) -> Result<Graph, MindmapError> {
    normalize_with_format(value).map(|(graph, _)| graph)
}

pub fn normalize_with_format(value: &Value) -> Result<(Graph, PayloadFormat), MindmapError> {
    let (graph, format) = normalize_at(value, 0)?;
    debug!(
        ?format,
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "normalized mindmap payload"
    );
    Ok((graph, format))
}

fn normalize_at(value: &Value, depth: usize) -> Result<(Graph, PayloadFormat), MindmapError> {
    if depth > MAX_UNWRAP_DEPTH {
        return Err(MindmapError::MalformedPayload(
            "payload is wrapped too deeply".to_string(),
        ));
    }

    match classify(value) {
        Shape::ParentList(items) => Ok((from_parent_list(items), PayloadFormat::ParentList)),
        Shape::Hierarchy(root) => Ok((from_hierarchy(root), PayloadFormat::Hierarchy)),
        Shape::Elements(elements) => Ok((from_elements(elements), PayloadFormat::Elements)),
        Shape::Canonical { nodes, edges } => {
            Ok((from_canonical(nodes, edges), PayloadFormat::Canonical))
        }
        Shape::Wrapped(first) => {
            debug!("payload is wrapped in an array, unwrapping first element");
            normalize_at(first, depth + 1)
        }
        Shape::Envelope(inner) => normalize_at(inner, depth + 1),
        Shape::Encoded(text) => {
            let inner: Value = serde_json::from_str(text).map_err(|_| {
                MindmapError::MalformedPayload("payload is a plain string, not JSON".to_string())
            })?;
            normalize_at(&inner, depth + 1)
        }
        Shape::Unrecognized(reason) => Err(MindmapError::MalformedPayload(reason)),
    }
}

fn classify(value: &Value) -> Shape<'_> {
    match value {
        Value::Array(items) if is_parent_list(items) => Shape::ParentList(items),
        Value::Array(items) => match items.first() {
            Some(first) => Shape::Wrapped(first),
            None => Shape::Unrecognized("payload is an empty array".to_string()),
        },
        Value::Object(map) => {
            if let Some(root) = hierarchy_root(map) {
                return Shape::Hierarchy(root);
            }
            if let Some(Value::Array(elements)) = map.get("elements") {
                return Shape::Elements(elements);
            }
            if let Some(Value::Array(nodes)) = map.get("nodes") {
                return match map.get("edges") {
                    Some(Value::Array(edges)) => Shape::Canonical { nodes, edges },
                    None | Some(Value::Null) => Shape::Canonical { nodes, edges: &[] },
                    Some(_) => Shape::Unrecognized("`edges` must be an array".to_string()),
                };
            }
            match map.get("mindmap_data") {
                Some(inner) if !inner.is_null() => Shape::Envelope(inner),
                _ => {
                    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                    Shape::Unrecognized(format!(
                        "no nodes, edges, elements or root in object with keys [{}]",
                        keys.join(", ")
                    ))
                }
            }
        }
        Value::String(text) => Shape::Encoded(text),
        Value::Null => Shape::Unrecognized("payload is null".to_string()),
        Value::Bool(_) | Value::Number(_) => {
            Shape::Unrecognized("payload is a scalar value".to_string())
        }
    }
}

fn is_parent_list(items: &[Value]) -> bool {
    match items.first().and_then(Value::as_object) {
        Some(first) => {
            first.contains_key("id") && !CONTAINER_KEYS.iter().any(|k| first.contains_key(*k))
        }
        None => false,
    }
}

fn hierarchy_root(map: &Map<String, Value>) -> Option<&Value> {
    map.get("root")
        .filter(|root| root.is_object())
        .or_else(|| {
            map.get("output")
                .and_then(|output| output.get("root"))
                .filter(|root| root.is_object())
        })
}

fn from_parent_list(items: &[Value]) -> Graph {
    let mut builder = GraphBuilder::default();
    for (index, item) in items.iter().enumerate() {
        let Ok(raw) = RawNode::deserialize(item) else {
            warn!(index, "skipping parent-list entry that is not an object");
            continue;
        };
        let Some(id) = coerce_id(&raw.id) else {
            warn!(index, "skipping parent-list entry without an id");
            continue;
        };
        let parent = coerce_id(&raw.parent_id);
        let mut node = build_node(id.clone(), &raw);
        node.is_root = parent.is_none();
        if builder.add_node(node) {
            if let Some(parent) = parent {
                builder.add_edge(None, parent, id, Map::new());
            }
        }
    }
    builder.finish()
}

fn from_hierarchy(root: &Value) -> Graph {
    let mut builder = GraphBuilder::default();
    // Explicit stack, children pushed in reverse: depth-first pre-order.
    let mut stack: Vec<(&Value, Option<String>)> = vec![(root, None)];
    while let Some((value, parent)) = stack.pop() {
        let Ok(raw) = RawNode::deserialize(value) else {
            warn!("skipping hierarchy child that is not an object");
            continue;
        };
        let Some(id) = coerce_id(&raw.id) else {
            warn!("skipping hierarchy node without an id, along with its subtree");
            continue;
        };
        let mut node = build_node(id.clone(), &raw);
        node.is_root = parent.is_none();
        if !builder.add_node(node) {
            continue;
        }
        if let Some(parent) = parent {
            builder.add_edge(None, parent, id.clone(), Map::new());
        }
        if let Some(Value::Array(children)) = value.get("children") {
            for child in children.iter().rev() {
                stack.push((child, Some(id.clone())));
            }
        }
    }
    builder.finish()
}

fn from_elements(elements: &[Value]) -> Graph {
    let mut builder = GraphBuilder::default();
    for (index, element) in elements.iter().enumerate() {
        let has = |key: &str| element.get(key).is_some_and(|v| !v.is_null());
        if has("source") && has("target") {
            match RawEdge::deserialize(element) {
                Ok(raw) => add_raw_edge(&mut builder, raw, index),
                Err(_) => warn!(index, "skipping malformed edge element"),
            }
        } else if has("position") {
            let Ok(raw) = RawNode::deserialize(element) else {
                warn!(index, "skipping malformed node element");
                continue;
            };
            match coerce_id(&raw.id) {
                Some(id) => {
                    let node = build_node(id, &raw);
                    builder.add_node(node);
                }
                None => warn!(index, "skipping node element without an id"),
            }
        } else {
            debug!(index, "dropping element that is neither a node nor an edge");
        }
    }
    builder.finish()
}

fn from_canonical(nodes: &[Value], edges: &[Value]) -> Graph {
    let mut builder = GraphBuilder::default();
    for (index, item) in nodes.iter().enumerate() {
        let Ok(raw) = RawNode::deserialize(item) else {
            warn!(index, "skipping node that is not an object");
            continue;
        };
        match coerce_id(&raw.id) {
            Some(id) => {
                let node = build_node(id, &raw);
                builder.add_node(node);
            }
            None => warn!(index, "skipping node without an id"),
        }
    }
    for (index, item) in edges.iter().enumerate() {
        match RawEdge::deserialize(item) {
            Ok(raw) => add_raw_edge(&mut builder, raw, index),
            Err(_) => warn!(index, "skipping edge that is not an object"),
        }
    }
    builder.finish()
}

fn add_raw_edge(builder: &mut GraphBuilder, raw: RawEdge, index: usize) {
    match (coerce_id(&raw.source), coerce_id(&raw.target)) {
        (Some(source), Some(target)) => {
            builder.add_edge(coerce_id(&raw.id), source, target, raw.extra);
        }
        _ => warn!(index, "skipping edge without a usable source and target"),
    }
}

fn build_node(id: String, raw: &RawNode) -> GraphNode {
    let data = raw.data.as_object();
    let field = |key: &str| data.and_then(|d| d.get(key));

    let label = field("label")
        .and_then(text)
        .or_else(|| text(&raw.label))
        .unwrap_or_else(|| DEFAULT_LABEL.to_string());
    let description = field("description")
        .and_then(text)
        .or_else(|| field("content").and_then(text))
        .or_else(|| text(&raw.description));
    let is_root = field("isRoot").and_then(Value::as_bool).unwrap_or(false);
    let attributes = data
        .map(|d| {
            d.iter()
                .filter(|(key, _)| !RESERVED_DATA_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    GraphNode {
        id,
        label,
        description,
        is_root,
        position: position_of(&raw.position),
        node_type: text(&raw.node_type),
        attributes,
    }
}

/// Ids arrive as strings or numbers; both must match string references.
fn coerce_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn position_of(value: &Value) -> Position {
    let coord = |key: &str| value.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    Position::new(coord("x"), coord("y"))
}

#[derive(Default)]
struct GraphBuilder {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    seen: HashSet<String>,
}

impl GraphBuilder {
    /// First occurrence of an id wins.
    fn add_node(&mut self, node: GraphNode) -> bool {
        if self.seen.insert(node.id.clone()) {
            self.nodes.push(node);
            true
        } else {
            debug!(id = %node.id, "ignoring duplicate node id");
            false
        }
    }

    fn add_edge(
        &mut self,
        id: Option<String>,
        source: String,
        target: String,
        attributes: Map<String, Value>,
    ) {
        let id = id.unwrap_or_else(|| format!("e{}", self.edges.len()));
        self.edges.push(GraphEdge {
            id,
            source,
            target,
            attributes,
        });
    }

    fn finish(self) -> Graph {
        Graph::new(self.nodes, self.edges)
    }
}
