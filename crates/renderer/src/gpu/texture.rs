use crate::error::{FractalError, Result, SyncError};
use crate::sync::{FrameSynchronizer, HandoffBackend, KernelTiming, Ownership, OwnershipTracker};
use crate::types::SHARED_TEXTURE_FORMAT;

/// The one image written by the kernel and sampled by the display program.
///
/// Both views are private: callers get bind groups built once at startup, and
/// every change of access rights goes through [`SharedTexture::handoff`].
pub(crate) struct SharedTexture {
    sampled_view: wgpu::TextureView,
    storage_view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    texture: wgpu::Texture,
    tracker: OwnershipTracker,
}

impl SharedTexture {
    /// Allocates the texture; its contents stay undefined until the first kernel pass.
    pub(crate) fn create(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        linear_filtering: bool,
    ) -> Result<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shared fractal texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SHARED_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let sampled_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("shared texture (graphics view)"),
            ..Default::default()
        });
        // Compute side imports mip level 0 only.
        let storage_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("shared texture (compute view)"),
            base_mip_level: 0,
            mip_level_count: Some(1),
            ..Default::default()
        });

        let filter = if linear_filtering {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shared texture sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(FractalError::Interop(format!(
                "failed to create shared texture: {err}"
            )));
        }

        tracing::debug!(width, height, format = ?SHARED_TEXTURE_FORMAT, ?filter, "shared texture created");
        Ok(Self {
            sampled_view,
            storage_view,
            sampler,
            texture,
            tracker: OwnershipTracker::new(),
        })
    }

    /// Binds the texture as the kernel's sole argument.
    pub(crate) fn bind_kernel_argument(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> Result<wgpu::BindGroup> {
        bind_checked(device, "kernel argument", || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("kernel argument 0"),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.storage_view),
                }],
            })
        })
    }

    /// Binds the texture and its sampler for the display program.
    pub(crate) fn bind_for_display(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> Result<wgpu::BindGroup> {
        bind_checked(device, "display sampler", || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("display texture"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&self.sampled_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            })
        })
    }

    pub(crate) fn ownership(&self) -> Ownership {
        self.tracker.current()
    }

    pub(crate) fn completed_handoffs(&self) -> u64 {
        self.tracker.completed_handoffs()
    }

    /// Fails unless the graphics side currently holds access rights.
    pub(crate) fn ensure_graphics_owned(&self) -> Result<(), SyncError> {
        self.tracker.ensure(Ownership::GraphicsOwned)
    }

    /// Lends the texture to the compute side for one kernel pass.
    pub(crate) fn handoff(
        &mut self,
        synchronizer: &FrameSynchronizer,
        backend: &mut impl HandoffBackend,
    ) -> Result<KernelTiming, SyncError> {
        synchronizer.run(&mut self.tracker, backend)
    }

    /// Raw texture for copies; only valid while graphics-owned.
    pub(crate) fn texture(&self) -> Result<&wgpu::Texture, SyncError> {
        self.ensure_graphics_owned()?;
        Ok(&self.texture)
    }
}

fn bind_checked(
    device: &wgpu::Device,
    what: &str,
    create: impl FnOnce() -> wgpu::BindGroup,
) -> Result<wgpu::BindGroup> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let group = create();
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(FractalError::Interop(format!(
            "failed to bind shared texture as {what}: {err}"
        ))),
        None => Ok(group),
    }
}
