use std::collections::HashMap;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::graph;

pub type NodeId = u32;

/// Texture filtering applied to every output texture of a material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Linear,
    Nearest,
}

/// Read-only snapshot of a node graph plus its global output settings.
///
/// The graph editor owns and mutates materials; the rendering core only ever
/// sees `&Material` snapshots.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Material {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "outputWidth")]
    pub output_width: u32,
    #[serde(rename = "outputHeight")]
    pub output_height: u32,
    #[serde(rename = "filterMode", default)]
    pub filter_mode: FilterMode,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "typePath")]
    pub type_path: String,

    // Editor metadata; the renderer never reads these.
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(rename = "zIndex", default)]
    pub z_index: i32,

    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct SocketAddr {
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
    #[serde(rename = "socketId")]
    pub socket_id: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub from: SocketAddr,
    pub to: SocketAddr,
}

impl SocketAddr {
    pub fn new(node_id: NodeId, socket_id: impl Into<String>) -> Self {
        Self {
            node_id,
            socket_id: socket_id.into(),
        }
    }
}

impl std::fmt::Display for SocketAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node_id, self.socket_id)
    }
}

impl Node {
    pub fn new(id: NodeId, type_path: impl Into<String>) -> Self {
        Self {
            id,
            type_path: type_path.into(),
            label: String::new(),
            x: 0.0,
            y: 0.0,
            z_index: 0,
            parameters: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

impl Material {
    pub fn new(id: impl Into<String>, output_size: [u32; 2]) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            output_width: output_size[0],
            output_height: output_size[1],
            filter_mode: FilterMode::default(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn output_size(&self) -> [u32; 2] {
        [self.output_width, self.output_height]
    }

    /// Copy of this material rendering at a different resolution.
    pub fn with_output_size(&self, size: [u32; 2]) -> Material {
        let mut out = self.clone();
        out.output_width = size[0];
        out.output_height = size[1];
        out
    }

    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == node_id)
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.node(node.id).is_some() {
            bail!("material '{}' already has a node with id {}", self.id, node.id);
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Removes a node together with every connection touching it.
    ///
    /// Callers must also drop the node's GPU resources
    /// (`Compositor::on_node_removed`).
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<(Node, Vec<Connection>)> {
        let idx = self.nodes.iter().position(|n| n.id == node_id)?;
        let node = self.nodes.remove(idx);
        let (removed, kept): (Vec<Connection>, Vec<Connection>) = std::mem::take(
            &mut self.connections,
        )
        .into_iter()
        .partition(|c| c.from.node_id == node_id || c.to.node_id == node_id);
        self.connections = kept;
        Some((node, removed))
    }

    /// Connects `from` to the input socket `to`.
    ///
    /// An input socket accepts a single connection: an existing connection
    /// into `to` is replaced and returned. Connections that would close a
    /// cycle are rejected.
    pub fn connect(&mut self, from: SocketAddr, to: SocketAddr) -> Result<Option<Connection>> {
        if self.node(from.node_id).is_none() {
            bail!("connection source references missing node {}", from.node_id);
        }
        if self.node(to.node_id).is_none() {
            bail!("connection target references missing node {}", to.node_id);
        }
        if graph::creates_cycle(self, from.node_id, to.node_id) {
            bail!("connecting {from} -> {to} would create a cycle");
        }

        let replaced = self.disconnect(&to);
        self.connections.push(Connection { from, to });
        Ok(replaced)
    }

    /// Removes the connection terminating at `to`, if any.
    pub fn disconnect(&mut self, to: &SocketAddr) -> Option<Connection> {
        let idx = self.connections.iter().position(|c| &c.to == to)?;
        Some(self.connections.remove(idx))
    }

    pub fn incoming_connection(&self, node_id: NodeId, socket_id: &str) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.to.node_id == node_id && c.to.socket_id == socket_id)
    }

    pub fn incoming_connections(&self, node_id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.to.node_id == node_id)
    }

    pub fn outgoing_connections(&self, node_id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections
            .iter()
            .filter(move |c| c.from.node_id == node_id)
    }
}

pub fn load_material_from_path(path: impl AsRef<std::path::Path>) -> Result<Material> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read material json at {}", path.display()))?;
    load_material_from_str(&text)
        .with_context(|| format!("failed to parse material json at {}", path.display()))
}

pub fn load_material_from_str(text: &str) -> Result<Material> {
    let material: Material = serde_json::from_str(text).context("invalid material json")?;
    if material.output_width == 0 || material.output_height == 0 {
        bail!(
            "material '{}' has an empty output size {}x{}",
            material.id,
            material.output_width,
            material.output_height
        );
    }
    for c in &material.connections {
        for end in [&c.from, &c.to] {
            material
                .node(end.node_id)
                .ok_or_else(|| anyhow!("connection references missing node: {end}"))?;
        }
    }
    Ok(material)
}

/// Reads a count parameter. Integer and float literals are both accepted;
/// floats are floored and negative values clamp to zero.
pub fn json_count(v: &serde_json::Value) -> Option<u64> {
    if let Some(n) = v.as_u64() {
        return Some(n);
    }
    if v.is_i64() {
        return Some(0);
    }
    let f = v.as_f64().filter(|f| f.is_finite())?;
    Some(f.max(0.0).floor() as u64)
}

/// Reads a seed parameter without going through `f32`. Negative integers keep
/// their two's-complement bits and floats are floored.
pub fn json_seed(v: &serde_json::Value) -> Option<u64> {
    v.as_u64()
        .or_else(|| v.as_i64().map(|n| n as u64))
        .or_else(|| {
            v.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.floor() as i64 as u64)
        })
}

pub fn json_number_f32(v: &serde_json::Value) -> Option<f32> {
    v.as_f64()
        .map(|x| x as f32)
        .or_else(|| v.as_u64().map(|x| x as f32))
        .or_else(|| v.as_i64().map(|x| x as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> Material {
        let mut m = Material::new("m", [64, 64]);
        for id in 1..=3 {
            m.add_node(Node::new(id, "test")).unwrap();
        }
        m.connect(SocketAddr::new(1, "out"), SocketAddr::new(2, "in"))
            .unwrap();
        m.connect(SocketAddr::new(2, "out"), SocketAddr::new(3, "in"))
            .unwrap();
        m
    }

    #[test]
    fn connect_rejects_cycles_and_self_loops() {
        let mut m = chain();
        assert!(
            m.connect(SocketAddr::new(3, "out"), SocketAddr::new(1, "in"))
                .is_err()
        );
        assert!(
            m.connect(SocketAddr::new(2, "out"), SocketAddr::new(2, "other"))
                .is_err()
        );
        assert_eq!(m.connections.len(), 2);
    }

    #[test]
    fn remove_node_drops_its_connections() {
        let mut m = chain();
        let (node, removed) = m.remove_node(2).expect("node 2 exists");
        assert_eq!(node.id, 2);
        assert_eq!(removed.len(), 2);
        assert!(m.connections.is_empty());
        assert!(m.remove_node(2).is_none());
    }

    #[test]
    fn counts_floor_floats_and_clamp_negatives() {
        assert_eq!(json_count(&json!(3.7)), Some(3));
        assert_eq!(json_count(&json!(-2)), Some(0));
        assert_eq!(json_count(&json!(-0.5)), Some(0));
        assert_eq!(json_count(&json!(70000)), Some(70000));
        assert_eq!(json_count(&json!("3")), None);
    }

    #[test]
    fn seeds_stay_exact_integers() {
        assert_eq!(json_seed(&json!(16777217)), Some(16777217));
        assert_eq!(json_seed(&json!(u64::MAX)), Some(u64::MAX));
        assert_eq!(json_seed(&json!(-1)), Some(u64::MAX));
        assert_eq!(json_seed(&json!(7.9)), Some(7));
        assert_eq!(json_seed(&json!(null)), None);
    }

    #[test]
    fn load_rejects_dangling_connections() {
        let text = r#"{
            "id": "m", "outputWidth": 8, "outputHeight": 8,
            "nodes": [{ "id": 1, "typePath": "generator/solid-color" }],
            "connections": [{
                "from": { "nodeId": 1, "socketId": "out" },
                "to": { "nodeId": 9, "socketId": "in" }
            }]
        }"#;
        let err = load_material_from_str(text).unwrap_err();
        assert!(format!("{err:#}").contains("9.in"));
    }
}
