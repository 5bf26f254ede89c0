//! WGSL module assembly.
//!
//! Shader-pass node types only ship a fragment stage (`fs_main`). The full
//! module is the fullscreen-triangle vertex stage, the `NodeParams` uniform
//! block at `@group(0) @binding(0)` and one texture/sampler pair per input
//! socket at `@group(1) @binding(2i)` / `@binding(2i + 1)`, named
//! `<socket>_tex` and `<socket>_samp`. A node type with several outputs writes
//! output `i` to `@location(i)`.

use anyhow::{Result, bail};

use crate::{renderer::uniforms::ParamLayout, schema::NodeSpec};

pub const PARAMS_STRUCT: &str = "NodeParams";

const FULLSCREEN_VERTEX: &str = r#"struct VsOut {
    @builtin(position) position: vec4f,
    @location(0) uv: vec2f,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VsOut {
    var positions = array<vec2f, 3>(
        vec2f(-1.0, -1.0),
        vec2f(3.0, -1.0),
        vec2f(-1.0, 3.0),
    );
    let pos = positions[vertex_index];
    var out: VsOut;
    out.position = vec4f(pos, 0.0, 1.0);
    // uv (0, 0) is the top-left texel, matching bitmap row order.
    out.uv = vec2f(pos.x * 0.5 + 0.5, 0.5 - pos.y * 0.5);
    return out;
}
"#;

/// Shared by the scatter and tile painters: a unit quad per instance,
/// transformed by a per-instance column-major matrix, sampling `image`.
pub const INSTANCED_SHADER: &str = r#"struct InstanceOut {
    @builtin(position) position: vec4f,
    @location(0) uv: vec2f,
}

@group(0) @binding(0) var image_tex: texture_2d<f32>;
@group(0) @binding(1) var image_samp: sampler;

@vertex
fn vs_main(
    @location(0) position: vec2f,
    @location(1) uv: vec2f,
    @location(2) m0: vec4f,
    @location(3) m1: vec4f,
    @location(4) m2: vec4f,
    @location(5) m3: vec4f,
) -> InstanceOut {
    let inst_m = mat4x4f(m0, m1, m2, m3);
    var out: InstanceOut;
    out.position = inst_m * vec4f(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: InstanceOut) -> @location(0) vec4f {
    return textureSample(image_tex, image_samp, in.uv);
}
"#;

/// Lit ground plane. Normals come from central differences of the height
/// channel; `texel.xy` is one texel in uv units and `texel.z` the height scale.
pub const PREVIEW_SHADER: &str = r#"struct PreviewUniforms {
    view_proj: mat4x4f,
    light_dir: vec4f,
    texel: vec4f,
}

@group(0) @binding(0) var<uniform> u: PreviewUniforms;

@group(1) @binding(0) var albedo_tex: texture_2d<f32>;
@group(1) @binding(1) var albedo_samp: sampler;
@group(1) @binding(2) var height_tex: texture_2d<f32>;
@group(1) @binding(3) var height_samp: sampler;

struct PreviewOut {
    @builtin(position) position: vec4f,
    @location(0) uv: vec2f,
}

@vertex
fn vs_main(@location(0) position: vec3f, @location(1) uv: vec2f) -> PreviewOut {
    var out: PreviewOut;
    out.position = u.view_proj * vec4f(position, 1.0);
    out.uv = uv;
    return out;
}

fn height_at(uv: vec2f) -> f32 {
    return textureSampleLevel(height_tex, height_samp, uv, 0.0).r;
}

@fragment
fn fs_main(in: PreviewOut) -> @location(0) vec4f {
    let albedo = textureSample(albedo_tex, albedo_samp, in.uv);
    let dx = height_at(in.uv + vec2f(u.texel.x, 0.0)) - height_at(in.uv - vec2f(u.texel.x, 0.0));
    let dy = height_at(in.uv + vec2f(0.0, u.texel.y)) - height_at(in.uv - vec2f(0.0, u.texel.y));
    let normal = normalize(vec3f(-dx * u.texel.z, 1.0, -dy * u.texel.z));
    let light = normalize(u.light_dir.xyz);
    let diffuse = max(dot(normal, light), 0.0);
    let ambient = 0.15;
    let rgb = albedo.rgb * (ambient + diffuse * (1.0 - ambient));
    return vec4f(rgb, 1.0);
}
"#;

pub fn sanitize_wgsl_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "s_");
    }
    out
}

pub fn input_texture_name(socket_id: &str) -> String {
    format!("{}_tex", sanitize_wgsl_ident(socket_id))
}

pub fn input_sampler_name(socket_id: &str) -> String {
    format!("{}_samp", sanitize_wgsl_ident(socket_id))
}

/// Complete module for a shader-pass node type.
pub fn build_shader_pass_module(spec: &NodeSpec) -> Result<String> {
    let Some(fragment) = spec.shader.as_deref() else {
        bail!("{}: shader_pass node type has no shader source", spec.type_path);
    };
    let layout = ParamLayout::for_spec(spec);
    let mut out = String::new();
    out.push_str(FULLSCREEN_VERTEX);
    out.push('\n');
    out.push_str(&layout.wgsl_struct(PARAMS_STRUCT));
    out.push_str(&format!(
        "\n@group(0) @binding(0) var<uniform> params: {PARAMS_STRUCT};\n"
    ));
    if !spec.inputs.is_empty() {
        out.push('\n');
    }
    for (i, socket) in spec.inputs.iter().enumerate() {
        out.push_str(&format!(
            "@group(1) @binding({}) var {}: texture_2d<f32>;\n",
            i * 2,
            input_texture_name(&socket.id)
        ));
        out.push_str(&format!(
            "@group(1) @binding({}) var {}: sampler;\n",
            i * 2 + 1,
            input_sampler_name(&socket.id)
        ));
    }
    out.push('\n');
    out.push_str(fragment);
    Ok(out)
}
