use std::borrow::Cow;

use crate::compile::{self, SourceSet};
use crate::error::{BuildError, BuildStage, Result};
use crate::types::{BuildOptions, FractalConfig, SHARED_TEXTURE_FORMAT};

/// Compute pipeline for the fractal kernel.
///
/// The kernel takes one argument, the shared texture as a write-only storage
/// image at binding 0.
pub(crate) struct ComputeKernel {
    pub pipeline: wgpu::ComputePipeline,
    pub argument_layout: wgpu::BindGroupLayout,
    entry: String,
}

impl ComputeKernel {
    pub(crate) fn build(device: &wgpu::Device, config: &FractalConfig) -> Result<Self> {
        let sources = SourceSet::read(&config.shaders.kernel)?;
        let compiled = compile::compile_kernel(sources, &config.kernel_entry, config.local_work_size)
            .inspect_err(|err| {
                tracing::debug!(unit = %err.unit, stage = %err.stage, "kernel build failed");
            })?;

        let constants = override_constants(&config.build_options, |name| {
            compiled.declares_override(name)
        });
        tracing::debug!(
            unit = %compiled.unit,
            entry = %compiled.entry,
            ?constants,
            "creating compute pipeline"
        );

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(compiled.unit.as_str()),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(compiled.source.as_str())),
        });

        let argument_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shared texture (storage)"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: SHARED_TEXTURE_FORMAT,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fractal kernel layout"),
            bind_group_layouts: &[&argument_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(compiled.entry.as_str()),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(compiled.entry.as_str()),
            compilation_options: wgpu::PipelineCompilationOptions {
                constants: &constants,
                zero_initialize_workgroup_memory: false,
            },
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BuildError::new(BuildStage::ProgramBuild, &compiled.unit, err.to_string()).into());
        }

        Ok(Self {
            pipeline,
            argument_layout,
            entry: compiled.entry,
        })
    }

    pub(crate) fn entry(&self) -> &str {
        &self.entry
    }
}

/// Relaxed-float flags the kernel actually declares, as pipeline constants.
fn override_constants(
    options: &BuildOptions,
    declared: impl Fn(&str) -> bool,
) -> Vec<(&'static str, f64)> {
    options
        .constants()
        .into_iter()
        .filter(|(name, _)| declared(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_declared_overrides_are_passed() {
        let constants = override_constants(&BuildOptions::default(), |name| {
            name == BuildOptions::FINITE_MATH_ONLY
        });
        assert_eq!(constants, vec![("FINITE_MATH_ONLY", 1.0)]);
    }

    #[test]
    fn nothing_is_passed_to_a_kernel_without_overrides() {
        let constants = override_constants(&BuildOptions::default(), |_| false);
        assert!(constants.is_empty());
    }
}
