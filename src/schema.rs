//! Node-type metadata (`NodeSpec`) and the bundled node catalog.
//!
//! The rendering core never owns a registry of node types: it asks a
//! [`NodeSpecResolver`] for the spec of a node's `typePath`. [`NodeCatalog`]
//! is the resolver for the built-in node types shipped in
//! `assets/node-catalog.json`.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::material::Node;

const DEFAULT_NODE_CATALOG_JSON: &str = include_str!("../assets/node-catalog.json");

/// Rendering strategy used for a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PainterKind {
    ShaderPass,
    Scatter,
    Tile,
    /// Any painter name this build does not know. Nodes of this kind fail to render.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    #[default]
    Standard,
    /// Feeds a preview channel selected by its `target` parameter.
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    Color,
    /// One of `options`; uploaded as the option index.
    Choice,
    /// Free text, never uploaded to the GPU.
    Text,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParamSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(default)]
    pub default: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SocketSpec {
    pub id: String,
    #[serde(default)]
    pub label: String,
    /// UI-only flag.
    #[serde(default)]
    pub hidden: bool,
}

/// Everything the renderer needs to know about a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub type_path: String,
    pub label: String,
    pub painter: PainterKind,
    pub role: NodeRole,
    pub parameters: Vec<ParamSpec>,
    pub inputs: Vec<SocketSpec>,
    pub outputs: Vec<SocketSpec>,
    /// WGSL fragment stage for shader-pass nodes (must define `fs_main`).
    pub shader: Option<String>,
}

impl ParamSpec {
    pub fn new(id: impl Into<String>, ty: ParamType, default: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ty,
            default,
            options: Vec::new(),
        }
    }

    pub fn choice(id: impl Into<String>, options: &[&str], default: &str) -> Self {
        Self {
            id: id.into(),
            ty: ParamType::Choice,
            default: serde_json::Value::String(default.to_string()),
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SocketSpec {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            hidden: false,
        }
    }
}

impl NodeSpec {
    pub fn new(type_path: impl Into<String>, painter: PainterKind) -> Self {
        let type_path = type_path.into();
        Self {
            label: type_path.clone(),
            type_path,
            painter,
            role: NodeRole::Standard,
            parameters: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            shader: None,
        }
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_input(mut self, id: &str) -> Self {
        self.inputs.push(SocketSpec::new(id));
        self
    }

    pub fn with_output(mut self, id: &str) -> Self {
        self.outputs.push(SocketSpec::new(id));
        self
    }

    pub fn with_shader(mut self, source: impl Into<String>) -> Self {
        self.shader = Some(source.into());
        self
    }

    pub fn is_output(&self) -> bool {
        self.role == NodeRole::Output
    }

    pub fn param(&self, id: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.id == id)
    }

    /// The node's own value for `id`, falling back to the declared default.
    pub fn param_value<'a>(&'a self, node: &'a Node, id: &str) -> Option<&'a serde_json::Value> {
        node.parameters
            .get(id)
            .or_else(|| self.param(id).map(|p| &p.default))
            .filter(|v| !v.is_null())
    }

    pub fn param_f32(&self, node: &Node, id: &str, default: f32) -> f32 {
        self.param_value(node, id)
            .and_then(crate::material::json_number_f32)
            .unwrap_or(default)
    }

    pub fn param_str<'a>(&'a self, node: &'a Node, id: &str) -> Option<&'a str> {
        self.param_value(node, id).and_then(|v| v.as_str())
    }
}

/// Resolves `typePath` strings to node specs.
pub trait NodeSpecResolver {
    fn resolve(&self, type_path: &str) -> Option<Arc<NodeSpec>>;
}

impl NodeSpecResolver for HashMap<String, Arc<NodeSpec>> {
    fn resolve(&self, type_path: &str) -> Option<Arc<NodeSpec>> {
        self.get(type_path).cloned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeCatalog {
    specs: HashMap<String, Arc<NodeSpec>>,
}

impl NodeCatalog {
    pub fn insert(&mut self, spec: NodeSpec) {
        self.specs.insert(spec.type_path.clone(), Arc::new(spec));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<NodeSpec>> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl NodeSpecResolver for NodeCatalog {
    fn resolve(&self, type_path: &str) -> Option<Arc<NodeSpec>> {
        self.specs.get(type_path).cloned()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawCatalog {
    #[allow(dead_code)]
    version: String,
    nodes: Vec<RawNodeDef>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawNodeDef {
    #[serde(rename = "typePath")]
    type_path: String,
    #[serde(default)]
    label: Option<String>,
    painter: PainterKind,
    #[serde(default)]
    role: NodeRole,
    #[serde(default)]
    parameters: Vec<ParamSpec>,
    #[serde(default)]
    inputs: Vec<SocketSpec>,
    #[serde(default)]
    outputs: Vec<SocketSpec>,
    #[serde(default)]
    shader: Option<String>,
}

fn builtin_shader(name: &str) -> Option<&'static str> {
    Some(match name {
        "solid_color" => include_str!("../assets/shaders/solid_color.wgsl"),
        "noise" => include_str!("../assets/shaders/noise.wgsl"),
        "shape" => include_str!("../assets/shaders/shape.wgsl"),
        "blend" => include_str!("../assets/shaders/blend.wgsl"),
        "transform" => include_str!("../assets/shaders/transform.wgsl"),
        "invert" => include_str!("../assets/shaders/invert.wgsl"),
        "output" => include_str!("../assets/shaders/output.wgsl"),
        _ => return None,
    })
}

pub fn load_default_catalog() -> Result<NodeCatalog> {
    parse_catalog(DEFAULT_NODE_CATALOG_JSON)
        .map_err(|e| anyhow!("failed to load assets/node-catalog.json: {e:#}"))
}

pub fn parse_catalog(text: &str) -> Result<NodeCatalog> {
    let raw: RawCatalog = serde_json::from_str(text)?;
    let mut catalog = NodeCatalog::default();
    for def in raw.nodes {
        let shader = match def.shader.as_deref() {
            Some(name) => Some(
                builtin_shader(name)
                    .ok_or_else(|| anyhow!("{}: unknown shader '{name}'", def.type_path))?
                    .to_string(),
            ),
            None => None,
        };
        if def.painter == PainterKind::ShaderPass && shader.is_none() {
            bail!("{}: shader_pass nodes must name a shader", def.type_path);
        }
        if def.outputs.is_empty() {
            bail!("{}: node types must declare at least one output", def.type_path);
        }
        for p in &def.parameters {
            if p.ty == ParamType::Choice && p.options.is_empty() {
                bail!("{}.{}: choice parameter without options", def.type_path, p.id);
            }
        }

        catalog.insert(NodeSpec {
            label: def.label.unwrap_or_else(|| def.type_path.clone()),
            type_path: def.type_path,
            painter: def.painter,
            role: def.role,
            parameters: def.parameters,
            inputs: def.inputs,
            outputs: def.outputs,
            shader,
        });
    }
    Ok(catalog)
}
