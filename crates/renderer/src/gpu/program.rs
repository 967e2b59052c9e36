use std::borrow::Cow;

use crate::compile::{self, CompiledStage, GraphicsStage, LinkedStages};
use crate::error::{BuildError, BuildStage, Result};
use crate::geometry;
use crate::types::ShaderPaths;

const PROGRAM_LABEL: &str = "fractal display program";

/// Linked vertex + fragment pipeline that samples the shared texture.
///
/// Only the pipeline and its bind group layout outlive [`GraphicsProgram::build`];
/// the compiled stages are dropped as soon as the pipeline exists.
pub(crate) struct GraphicsProgram {
    pub pipeline: wgpu::RenderPipeline,
    pub texture_layout: wgpu::BindGroupLayout,
}

impl GraphicsProgram {
    pub(crate) fn build(
        device: &wgpu::Device,
        paths: &ShaderPaths,
        target_format: wgpu::TextureFormat,
        linear_filtering: bool,
    ) -> Result<Self> {
        let vertex_source = compile::read_source(&paths.vertex)?;
        let fragment_source = compile::read_source(&paths.fragment)?;

        let vertex = compile_logged(GraphicsStage::Vertex, &paths.vertex, vertex_source)?;
        let fragment = compile_logged(GraphicsStage::Fragment, &paths.fragment, fragment_source)?;
        let linked = compile::link_stages(
            PROGRAM_LABEL,
            vertex,
            fragment,
            &geometry::supplied_attributes(),
        )
        .inspect_err(|err| tracing::debug!(log = %err.log, "display program failed to link"))?;

        let program = Self::create(device, linked, target_format, linear_filtering)?;
        tracing::debug!(?target_format, linear_filtering, "display program ready");
        Ok(program)
    }

    fn create(
        device: &wgpu::Device,
        linked: LinkedStages,
        target_format: wgpu::TextureFormat,
        linear_filtering: bool,
    ) -> Result<Self, BuildError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = stage_module(device, &linked.vertex);
        let fragment_module = stage_module(device, &linked.fragment);
        drop(linked);

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shared texture (sampled)"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float {
                            filterable: linear_filtering,
                        },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(if linear_filtering {
                        wgpu::SamplerBindingType::Filtering
                    } else {
                        wgpu::SamplerBindingType::NonFiltering
                    }),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fractal display layout"),
            bind_group_layouts: &[&texture_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(PROGRAM_LABEL),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("main"),
                buffers: &geometry::vertex_layouts(),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BuildError::new(
                BuildStage::Link,
                PROGRAM_LABEL,
                err.to_string(),
            ));
        }

        Ok(Self {
            pipeline,
            texture_layout,
        })
    }
}

fn compile_logged(
    stage: GraphicsStage,
    path: &std::path::Path,
    source: String,
) -> Result<CompiledStage, BuildError> {
    let unit = path.display().to_string();
    compile::compile_stage(stage, unit, source).inspect_err(|err| {
        tracing::debug!(unit = %err.unit, "shader stage failed to compile");
    })
}

fn stage_module(device: &wgpu::Device, stage: &CompiledStage) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(stage.unit.as_str()),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(stage.source.as_str()),
            stage: stage.stage.naga_stage(),
            defines: &[],
        },
    })
}
