use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use anyhow::{Result, anyhow, bail};

use crate::renderer::{blend::BlendMode, gpu::OUTPUT_FORMAT, validation::validate_wgsl_with_context};

/// Identity of a compiled program: the hash of its full WGSL source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey(u64);

impl ProgramKey {
    pub fn for_source(source: &str) -> ProgramKey {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        ProgramKey(hasher.finish())
    }
}

pub struct ProgramDesc<'a> {
    pub label: &'a str,
    pub source: &'a str,
    /// One entry list per bind group, in group order.
    pub bind_groups: &'a [&'a [wgpu::BindGroupLayoutEntry]],
    pub vertex_buffers: &'a [wgpu::VertexBufferLayout<'a>],
    pub color_targets: usize,
    pub blend_modes: &'a [BlendMode],
}

/// A validated shader module with its bind group layouts and one pipeline
/// per blend mode it was built for.
#[derive(Debug)]
pub struct Program {
    pub key: ProgramKey,
    pub label: String,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    pipelines: HashMap<BlendMode, wgpu::RenderPipeline>,
}

impl Program {
    pub fn compile(device: &wgpu::Device, desc: &ProgramDesc<'_>) -> Result<Program> {
        validate_wgsl_with_context(desc.source, desc.label)?;
        if desc.color_targets == 0 {
            bail!("{}: program renders no color targets", desc.label);
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });

        let bind_group_layouts: Vec<wgpu::BindGroupLayout> = desc
            .bind_groups
            .iter()
            .enumerate()
            .map(|(group, entries)| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{}.bgl{group}", desc.label)),
                    entries,
                })
            })
            .collect();
        let layout_refs: Vec<&wgpu::BindGroupLayout> = bind_group_layouts.iter().collect();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{}.layout", desc.label)),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });

        let mut pipelines = HashMap::new();
        for blend in desc.blend_modes {
            let targets: Vec<Option<wgpu::ColorTargetState>> = (0..desc.color_targets)
                .map(|_| {
                    Some(wgpu::ColorTargetState {
                        format: OUTPUT_FORMAT,
                        blend: blend.blend_state(),
                        write_mask: wgpu::ColorWrites::ALL,
                    })
                })
                .collect();
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&format!("{}.pipeline.{blend:?}", desc.label)),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: desc.vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
            pipelines.insert(*blend, pipeline);
        }

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            bail!("{}: failed to build pipeline: {err}", desc.label);
        }

        Ok(Program {
            key: ProgramKey::for_source(desc.source),
            label: desc.label.to_string(),
            bind_group_layouts,
            pipelines,
        })
    }

    pub fn pipeline(&self, blend: BlendMode) -> Result<&wgpu::RenderPipeline> {
        self.pipelines
            .get(&blend)
            .ok_or_else(|| anyhow!("{}: no pipeline for blend mode {blend:?}", self.label))
    }

    pub fn bind_group_layout(&self, group: usize) -> Result<&wgpu::BindGroupLayout> {
        self.bind_group_layouts
            .get(group)
            .ok_or_else(|| anyhow!("{}: no bind group {group}", self.label))
    }
}

/// Compiled programs shared across nodes, keyed by source hash.
#[derive(Debug, Default)]
pub struct ProgramCache {
    programs: HashMap<ProgramKey, Arc<Program>>,
}

impl ProgramCache {
    pub fn get_or_build(
        &mut self,
        key: ProgramKey,
        build: impl FnOnce() -> Result<Program>,
    ) -> Result<Arc<Program>> {
        if let Some(program) = self.programs.get(&key) {
            return Ok(program.clone());
        }
        let program = Arc::new(build()?);
        log::debug!("compiled program '{}'", program.label);
        self.programs.insert(key, program.clone());
        Ok(program)
    }

    pub fn contains(&self, key: ProgramKey) -> bool {
        self.programs.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

pub fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Texture/sampler pairs at bindings `2i` and `2i + 1`.
pub fn texture_entries(count: usize) -> Vec<wgpu::BindGroupLayoutEntry> {
    (0..count as u32)
        .flat_map(|i| {
            [
                wgpu::BindGroupLayoutEntry {
                    binding: i * 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: i * 2 + 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ]
        })
        .collect()
}

pub fn texture_bind_group_entries<'a>(
    views: &[(&'a wgpu::TextureView, &'a wgpu::Sampler)],
) -> Vec<wgpu::BindGroupEntry<'a>> {
    views
        .iter()
        .enumerate()
        .flat_map(|(i, &(view, sampler))| {
            [
                wgpu::BindGroupEntry {
                    binding: i as u32 * 2,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: i as u32 * 2 + 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ]
        })
        .collect()
}
