//! Parameter uniform block for shader-pass nodes.
//!
//! Every uniform-backed parameter owns one 16-byte slot, so the generated
//! WGSL struct tags every field with `@align(16)` and the CPU side writes
//! slot `i` at byte offset `16 * i` without any std140 bookkeeping.

use std::collections::HashSet;

use serde_json::Value;

use crate::{
    material::{Node, json_number_f32},
    schema::{NodeSpec, ParamSpec, ParamType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    F32,
    I32,
    Vec2,
    Vec3,
    Vec4,
}

impl UniformType {
    pub fn for_param(ty: ParamType) -> Option<UniformType> {
        Some(match ty {
            ParamType::Float => UniformType::F32,
            ParamType::Int | ParamType::Bool | ParamType::Choice => UniformType::I32,
            ParamType::Vec2 => UniformType::Vec2,
            ParamType::Vec3 => UniformType::Vec3,
            ParamType::Vec4 | ParamType::Color => UniformType::Vec4,
            ParamType::Text => return None,
        })
    }

    pub fn wgsl(self) -> &'static str {
        match self {
            UniformType::F32 => "f32",
            UniformType::I32 => "i32",
            UniformType::Vec2 => "vec2f",
            UniformType::Vec3 => "vec3f",
            UniformType::Vec4 => "vec4f",
        }
    }

    fn components(self) -> usize {
        match self {
            UniformType::F32 | UniformType::I32 => 1,
            UniformType::Vec2 => 2,
            UniformType::Vec3 => 3,
            UniformType::Vec4 => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformField {
    pub param_id: String,
    /// WGSL member name, see [`param_field_name`].
    pub name: String,
    pub ty: UniformType,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamLayout {
    pub fields: Vec<UniformField>,
}

// WGSL keywords and reserved words that plausibly collide with parameter ids.
const WGSL_RESERVED: &[&str] = &[
    "alias", "break", "case", "const", "continue", "continuing", "default", "discard", "else",
    "enable", "false", "fn", "for", "if", "let", "loop", "override", "return", "struct",
    "switch", "true", "var", "while", "active", "common", "do", "enum", "filter", "from", "get",
    "impl", "layout", "match", "meta", "mod", "module", "move", "new", "null", "of", "pass",
    "patch", "resource", "self", "set", "shared", "smooth", "static", "target", "type", "use",
    "where", "with",
];

/// WGSL member name for a parameter id: non-identifier characters become
/// `_`, and names that clash with WGSL reserved words get a trailing `_`
/// (the `target` parameter is read as `params.target_`).
pub fn param_field_name(param_id: &str) -> String {
    let mut out: String = param_id
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) || out.starts_with("__") {
        out.insert_str(0, "p_");
    }
    if WGSL_RESERVED.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

enum SlotValue {
    Float([f32; 4]),
    Int(i32),
}

impl ParamLayout {
    pub fn for_spec(spec: &NodeSpec) -> ParamLayout {
        let mut used: HashSet<String> = HashSet::new();
        let mut fields = Vec::new();
        for param in &spec.parameters {
            let Some(ty) = UniformType::for_param(param.ty) else {
                continue;
            };
            let base = param_field_name(&param.id);
            let mut name = base.clone();
            let mut suffix: u32 = 2;
            while !used.insert(name.clone()) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
            fields.push(UniformField {
                param_id: param.id.clone(),
                name,
                ty,
            });
        }
        ParamLayout { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Buffer size; an empty block still occupies one slot.
    pub fn size_bytes(&self) -> u64 {
        (self.fields.len().max(1) as u64) * 16
    }

    pub fn wgsl_struct(&self, struct_name: &str) -> String {
        let mut out = format!("struct {struct_name} {{\n");
        if self.fields.is_empty() {
            out.push_str("    @align(16) _unused: vec4f,\n");
        }
        for field in &self.fields {
            out.push_str(&format!("    @align(16) {}: {},\n", field.name, field.ty.wgsl()));
        }
        out.push_str("}\n");
        out
    }

    /// Packs the node's parameter values, falling back to the declared
    /// default (and then zero) for missing or malformed values.
    pub fn pack(&self, spec: &NodeSpec, node: &Node) -> Vec<u8> {
        let mut bytes = vec![0u8; self.size_bytes() as usize];
        for (slot, field) in self.fields.iter().enumerate() {
            let Some(param) = spec.param(&field.param_id) else {
                continue;
            };

            let own = node.parameters.get(&param.id).filter(|v| !v.is_null());
            let value = match own.map(|v| coerce(param, field.ty, v)) {
                Some(Ok(v)) => Some(v),
                Some(Err(reason)) => {
                    log::warn!(
                        "node {} ({}): parameter '{}' {reason}; skipping the value",
                        node.id,
                        node.type_path,
                        param.id
                    );
                    None
                }
                None => None,
            };
            let value = value.or_else(|| coerce(param, field.ty, &param.default).ok());

            match value {
                Some(SlotValue::Float(v)) => write_f32_slot(&mut bytes, slot, v),
                Some(SlotValue::Int(v)) => write_i32_slot(&mut bytes, slot, [v, 0, 0, 0]),
                None => {}
            }
        }
        bytes
    }
}

fn coerce(param: &ParamSpec, ty: UniformType, value: &Value) -> Result<SlotValue, String> {
    match param.ty {
        ParamType::Choice => return choice_index(param, value).map(SlotValue::Int),
        ParamType::Bool => {
            return match value {
                Value::Bool(b) => Ok(SlotValue::Int(i32::from(*b))),
                v => json_number_f32(v)
                    .map(|x| SlotValue::Int(i32::from(x != 0.0)))
                    .ok_or_else(|| format!("expects a bool, got {v}")),
            };
        }
        ParamType::Int => {
            return json_number_f32(value)
                .filter(|x| x.is_finite())
                .map(|x| SlotValue::Int(x.floor() as i32))
                .ok_or_else(|| format!("expects an integer, got {value}"));
        }
        _ => {}
    }

    let mut out = if param.ty == ParamType::Color {
        [0.0, 0.0, 0.0, 1.0]
    } else {
        [0.0; 4]
    };
    let components: Vec<f32> = match value {
        Value::Array(items) => {
            if items.is_empty() || items.len() > 4 {
                return Err(format!("expects 1 to 4 numbers, got {} items", items.len()));
            }
            items
                .iter()
                .map(json_number_f32)
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(|| format!("expects numbers, got {value}"))?
        }
        v => vec![json_number_f32(v).ok_or_else(|| format!("expects a number, got {v}"))?],
    };
    if ty == UniformType::F32 && components.len() > 1 {
        return Err(format!("expects a scalar, got {} components", components.len()));
    }
    for (dst, src) in out.iter_mut().zip(components.iter().take(ty.components())) {
        *dst = *src;
    }
    Ok(SlotValue::Float(out))
}

fn choice_index(param: &ParamSpec, value: &Value) -> Result<i32, String> {
    if let Some(s) = value.as_str() {
        return param
            .options
            .iter()
            .position(|o| o == s || o.eq_ignore_ascii_case(s))
            .map(|i| i as i32)
            .ok_or_else(|| format!("'{s}' is not one of {:?}", param.options));
    }
    match value.as_u64() {
        Some(i) if (i as usize) < param.options.len() => Ok(i as i32),
        _ => Err(format!("expects one of {:?}, got {value}", param.options)),
    }
}

fn write_f32_slot(dst: &mut [u8], slot_index: usize, values: [f32; 4]) {
    let base = slot_index * 16;
    for (i, v) in values.into_iter().enumerate() {
        dst[base + i * 4..base + (i + 1) * 4].copy_from_slice(&v.to_ne_bytes());
    }
}

fn write_i32_slot(dst: &mut [u8], slot_index: usize, values: [i32; 4]) {
    let base = slot_index * 16;
    for (i, v) in values.into_iter().enumerate() {
        dst[base + i * 4..base + (i + 1) * 4].copy_from_slice(&v.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PainterKind;
    use serde_json::json;

    fn f32_at(bytes: &[u8], offset: usize) -> f32 {
        f32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn i32_at(bytes: &[u8], offset: usize) -> i32 {
        i32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn spec() -> NodeSpec {
        NodeSpec::new("test/params", PainterKind::ShaderPass)
            .with_param(ParamSpec::new("opacity", ParamType::Float, json!(0.5)))
            .with_param(ParamSpec::new("tint", ParamType::Color, json!([1.0, 0.0, 0.0, 1.0])))
            .with_param(ParamSpec::new("label", ParamType::Text, json!("x")))
            .with_param(ParamSpec::choice("mode", &["mix", "add", "multiply"], "mix"))
            .with_param(ParamSpec::new("wrap", ParamType::Bool, json!(false)))
            .with_param(ParamSpec::new("offset", ParamType::Vec2, json!([0.0, 0.0])))
    }

    #[test]
    fn layout_skips_text_and_uses_one_slot_per_param() {
        let layout = ParamLayout::for_spec(&spec());
        let names: Vec<&str> = layout.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["opacity", "tint", "mode", "wrap", "offset"]);
        assert_eq!(layout.size_bytes(), 80);

        let wgsl = layout.wgsl_struct("NodeParams");
        assert!(wgsl.contains("@align(16) tint: vec4f,"));
        assert!(wgsl.contains("@align(16) mode: i32,"));
    }

    #[test]
    fn pack_uses_node_values_and_defaults() {
        let layout = ParamLayout::for_spec(&spec());
        let node = Node::new(3, "test/params")
            .with_param("mode", json!("multiply"))
            .with_param("wrap", json!(true))
            .with_param("offset", json!([0.25]));
        let bytes = layout.pack(&spec(), &node);

        assert_eq!(f32_at(&bytes, 0), 0.5);
        assert_eq!(f32_at(&bytes, 16), 1.0);
        assert_eq!(f32_at(&bytes, 28), 1.0);
        assert_eq!(i32_at(&bytes, 32), 2);
        assert_eq!(i32_at(&bytes, 48), 1);
        assert_eq!(f32_at(&bytes, 64), 0.25);
        assert_eq!(f32_at(&bytes, 68), 0.0);
    }

    #[test]
    fn mismatched_shapes_keep_the_default() {
        let layout = ParamLayout::for_spec(&spec());
        let node = Node::new(3, "test/params")
            .with_param("opacity", json!("loud"))
            .with_param("tint", json!([1, 2, 3, 4, 5]))
            .with_param("mode", json!("overlay"));
        let bytes = layout.pack(&spec(), &node);

        assert_eq!(f32_at(&bytes, 0), 0.5);
        assert_eq!(f32_at(&bytes, 16), 1.0);
        assert_eq!(f32_at(&bytes, 20), 0.0);
        assert_eq!(i32_at(&bytes, 32), 0);
    }

    #[test]
    fn reserved_words_get_suffixed() {
        assert_eq!(param_field_name("target"), "target_");
        assert_eq!(param_field_name("spread-x"), "spread_x");
        assert_eq!(param_field_name("2d"), "p_2d");
        let empty = ParamLayout::default();
        assert_eq!(empty.size_bytes(), 16);
        assert!(empty.wgsl_struct("P").contains("_unused: vec4f"));
    }
}
