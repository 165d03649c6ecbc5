use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub description: Option<String>,
    /// Hint only; the tree builder falls back to structural inference.
    pub is_root: bool,
    pub position: Position,
    pub node_type: Option<String>,
    /// Remaining `data` fields, passed through untouched.
    pub attributes: Map<String, Value>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            is_root: false,
            position: Position::default(),
            node_type: None,
            attributes: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn root(mut self) -> Self {
        self.is_root = true;
        self
    }

    fn to_json(&self) -> Value {
        let mut data = self.attributes.clone();
        data.insert("label".to_string(), json!(self.label));
        if let Some(description) = &self.description {
            data.insert("description".to_string(), json!(description));
        }
        data.insert("isRoot".to_string(), json!(self.is_root));

        let mut node = Map::new();
        node.insert("id".to_string(), json!(self.id));
        node.insert("data".to_string(), Value::Object(data));
        node.insert(
            "position".to_string(),
            json!({ "x": self.position.x, "y": self.position.y }),
        );
        if let Some(node_type) = &self.node_type {
            node.insert("type".to_string(), json!(node_type));
        }
        Value::Object(node)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub attributes: Map<String, Value>,
}

impl GraphEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            attributes: Map::new(),
        }
    }

    fn to_json(&self) -> Value {
        let mut edge = self.attributes.clone();
        edge.insert("id".to_string(), json!(self.id));
        edge.insert("source".to_string(), json!(self.source));
        edge.insert("target".to_string(), json!(self.target));
        Value::Object(edge)
    }
}

/// Canonical graph. Edge order is significant: it fixes child order and
/// therefore branch indices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        Self { nodes, edges }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Serialize into the `{nodes, edges}` wire shape stored by the notebook record.
    pub fn to_canonical_json(&self) -> Value {
        let nodes: Vec<Value> = self.nodes.iter().map(GraphNode::to_json).collect();
        let edges: Vec<Value> = self.edges.iter().map(GraphEdge::to_json).collect();
        json!({ "nodes": nodes, "edges": edges })
    }
}

impl Serialize for Graph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_canonical_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn canonical_json_shape() {
        let mut child = GraphNode::new("1", "Child").with_description("details");
        child
            .attributes
            .insert("weight".to_string(), json!(3));
        let graph = Graph::new(
            vec![GraphNode::new("0", "Root").root(), child],
            vec![GraphEdge::new("e0", "0", "1")],
        );

        let value = graph.to_canonical_json();
        assert_eq!(value["nodes"][0]["data"]["isRoot"], json!(true));
        assert_eq!(value["nodes"][1]["data"]["label"], json!("Child"));
        assert_eq!(value["nodes"][1]["data"]["description"], json!("details"));
        assert_eq!(value["nodes"][1]["data"]["weight"], json!(3));
        assert_eq!(value["nodes"][1]["position"], json!({ "x": 0.0, "y": 0.0 }));
        assert_eq!(value["edges"][0], json!({ "id": "e0", "source": "0", "target": "1" }));
    }

    #[test]
    fn node_lookup_by_id() {
        let graph = Graph::new(vec![GraphNode::new("a", "A")], vec![]);
        assert_eq!(graph.node("a").map(|n| n.label.as_str()), Some("A"));
        assert!(graph.node("b").is_none());
        assert!(!graph.is_empty());
    }
}
