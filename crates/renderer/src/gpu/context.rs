use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::error::{FractalError, Result};
use crate::types::SHARED_TEXTURE_FORMAT;

/// Colour format of the headless render target; chosen so readback is 4 bytes
/// per pixel.
pub(crate) const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// What the shared texture format supports on the selected adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SharedFormatSupport {
    /// Linear min/mag filtering is available for 32-bit float texels.
    pub linear_filtering: bool,
    /// Kernel start/end can be stamped on the device timeline.
    pub timestamps: bool,
}

/// Where the display loop draws.
pub(crate) enum RenderTarget {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        texture: wgpu::Texture,
    },
}

/// One frame's colour attachment.
pub(crate) struct Frame {
    pub view: wgpu::TextureView,
    surface_texture: Option<wgpu::SurfaceTexture>,
}

impl Frame {
    pub(crate) fn present(self) {
        if let Some(texture) = self.surface_texture {
            texture.present();
        }
    }
}

/// Adapter, device and queue shared by the compute and graphics sides.
///
/// Fields drop in declaration order: the target (and its surface) goes before
/// the device, and the window handle last.
pub(crate) struct GpuContext {
    pub target: RenderTarget,
    pub target_format: wgpu::TextureFormat,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub support: SharedFormatSupport,
    instance: wgpu::Instance,
    _window: Option<Arc<Window>>,
}

/// Live handle counts on one instance, by resource kind.
#[doc(hidden)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveResources {
    pub devices: usize,
    pub queues: usize,
    pub shader_modules: usize,
    pub bind_group_layouts: usize,
    pub pipeline_layouts: usize,
    pub bind_groups: usize,
    pub render_pipelines: usize,
    pub compute_pipelines: usize,
    pub query_sets: usize,
    pub buffers: usize,
    pub textures: usize,
    pub texture_views: usize,
    pub samplers: usize,
}

impl LiveResources {
    pub fn total(&self) -> usize {
        [
            self.devices,
            self.queues,
            self.shader_modules,
            self.bind_group_layouts,
            self.pipeline_layouts,
            self.bind_groups,
            self.render_pipelines,
            self.compute_pipelines,
            self.query_sets,
            self.buffers,
            self.textures,
            self.texture_views,
            self.samplers,
        ]
        .iter()
        .sum()
    }
}

/// Reads the backend's resource registries; outlives the session it came from.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct ResourceReport {
    instance: wgpu::Instance,
}

impl ResourceReport {
    /// `None` when the backend keeps no registries.
    pub fn live(&self) -> Option<LiveResources> {
        let report = self.instance.generate_report()?;
        let hub = report.hub_report();
        Some(LiveResources {
            devices: hub.devices.num_kept_from_user,
            queues: hub.queues.num_kept_from_user,
            shader_modules: hub.shader_modules.num_kept_from_user,
            bind_group_layouts: hub.bind_group_layouts.num_kept_from_user,
            pipeline_layouts: hub.pipeline_layouts.num_kept_from_user,
            bind_groups: hub.bind_groups.num_kept_from_user,
            render_pipelines: hub.render_pipelines.num_kept_from_user,
            compute_pipelines: hub.compute_pipelines.num_kept_from_user,
            query_sets: hub.query_sets.num_kept_from_user,
            buffers: hub.buffers.num_kept_from_user,
            textures: hub.textures.num_kept_from_user,
            texture_views: hub.texture_views.num_kept_from_user,
            samplers: hub.samplers.num_kept_from_user,
        })
    }
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

fn request_adapter(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
) -> Result<wgpu::Adapter> {
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: surface,
        force_fallback_adapter: false,
    }))
    .map_err(|err| FractalError::Environment(format!("no suitable GPU adapter: {err}")))
}

/// Checks that the adapter can share one `Rgba32Float` texture between a
/// kernel write and a sampled read.
fn check_shared_format(adapter: &wgpu::Adapter) -> Result<SharedFormatSupport> {
    let format_features = adapter.get_texture_format_features(SHARED_TEXTURE_FORMAT);
    let required = wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING;
    if !format_features.allowed_usages.contains(required) {
        return Err(FractalError::Interop(format!(
            "adapter cannot use {SHARED_TEXTURE_FORMAT:?} as both a storage and a sampled texture (allowed: {:?})",
            format_features.allowed_usages
        )));
    }

    let features = adapter.features();
    let linear_filtering = features.contains(wgpu::Features::FLOAT32_FILTERABLE);
    if !linear_filtering {
        tracing::warn!(
            format = ?SHARED_TEXTURE_FORMAT,
            "adapter cannot filter 32-bit float textures; falling back to nearest filtering"
        );
    }
    let timestamps = features.contains(wgpu::Features::TIMESTAMP_QUERY);
    if !timestamps {
        tracing::debug!("timestamp queries unavailable; kernel time measured on the host");
    }
    Ok(SharedFormatSupport {
        linear_filtering,
        timestamps,
    })
}

fn request_device(
    adapter: &wgpu::Adapter,
    support: SharedFormatSupport,
) -> Result<(wgpu::Device, wgpu::Queue)> {
    let mut required_features = wgpu::Features::empty();
    if support.linear_filtering {
        required_features |= wgpu::Features::FLOAT32_FILTERABLE;
    }
    if support.timestamps {
        required_features |= wgpu::Features::TIMESTAMP_QUERY;
    }

    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("fractal device"),
        required_features,
        required_limits: adapter.limits(),
        memory_hints: wgpu::MemoryHints::Performance,
        trace: wgpu::Trace::default(),
    }))
    .map(|(device, queue)| {
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            tracing::error!(error = %err, "uncaptured GPU error");
        }));
        (device, queue)
    })
    .map_err(|err| FractalError::Environment(format!("failed to create GPU device: {err}")))
}

fn check_size(adapter: &wgpu::Adapter, size: PhysicalSize<u32>) -> Result<()> {
    let max_dimension = adapter.limits().max_texture_dimension_2d;
    if size.width > max_dimension || size.height > max_dimension {
        return Err(FractalError::Environment(format!(
            "GPU max texture dimension is {max_dimension}, requested {}x{}",
            size.width, size.height
        )));
    }
    Ok(())
}

impl GpuContext {
    /// Wires the device to a window surface.
    pub(crate) fn for_window(window: Arc<Window>) -> Result<Self> {
        let instance = create_instance();

        let window_handle = window.window_handle().map_err(|err| {
            FractalError::Environment(format!("failed to acquire window handle: {err}"))
        })?;
        let display_handle = window.display_handle().map_err(|err| {
            FractalError::Environment(format!("failed to acquire display handle: {err}"))
        })?;

        // The window is kept alive in `_window` for as long as the surface exists.
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .map_err(|err| FractalError::Environment(format!("failed to create surface: {err}")))?;

        let adapter = request_adapter(&instance, Some(&surface))?;
        let size = window.inner_size();
        check_size(&adapter, size)?;
        let support = check_shared_format(&adapter)?;
        let (device, queue) = request_device(&adapter, support)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let Some(&first_format) = surface_caps.formats.first() else {
            return Err(FractalError::Environment(
                "surface is incompatible with the selected adapter".into(),
            ));
        };
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .unwrap_or(first_format);
        let present_mode = if surface_caps.present_modes.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            surface_caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        };
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        tracing::debug!(?surface_format, ?present_mode, "configured window surface");

        Ok(Self {
            target: RenderTarget::Surface { surface, config },
            target_format: surface_format,
            device,
            queue,
            adapter_info: adapter.get_info(),
            support,
            instance,
            _window: Some(window),
        })
    }

    /// Wires the device to an offscreen colour target of `size`.
    pub(crate) fn headless(size: PhysicalSize<u32>) -> Result<Self> {
        let instance = create_instance();
        let adapter = request_adapter(&instance, None)?;
        check_size(&adapter, size)?;
        let support = check_shared_format(&adapter)?;
        let (device, queue) = request_device(&adapter, support)?;

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen target"),
            size: wgpu::Extent3d {
                width: size.width.max(1),
                height: size.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        Ok(Self {
            target: RenderTarget::Offscreen { texture },
            target_format: OFFSCREEN_FORMAT,
            device,
            queue,
            adapter_info: adapter.get_info(),
            support,
            instance,
            _window: None,
        })
    }

    /// Backend identification printed once at startup.
    pub(crate) fn banner(&self) -> String {
        let info = &self.adapter_info;
        let driver = if info.driver_info.is_empty() {
            info.driver.clone()
        } else {
            format!("{} {}", info.driver, info.driver_info)
        };
        format!(
            "{:?} on {} ({:?}), driver {}; shaders GLSL 450 + WGSL",
            info.backend,
            info.name,
            info.device_type,
            driver.trim()
        )
    }

    pub(crate) fn resource_report(&self) -> ResourceReport {
        ResourceReport {
            instance: self.instance.clone(),
        }
    }

    /// The headless colour target, or an error for window sessions.
    pub(crate) fn offscreen_target(&self) -> Result<&wgpu::Texture> {
        match &self.target {
            RenderTarget::Offscreen { texture } => Ok(texture),
            RenderTarget::Surface { .. } => Err(FractalError::Environment(
                "frame readback needs a headless session".into(),
            )),
        }
    }

    /// Reconfigures the surface after a resize; offscreen targets keep their size.
    pub(crate) fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        if let RenderTarget::Surface { surface, config } = &mut self.target {
            config.width = new_size.width;
            config.height = new_size.height;
            surface.configure(&self.device, config);
            tracing::debug!(width = new_size.width, height = new_size.height, "resized surface");
        }
    }

    /// Next colour attachment, or `None` when this frame should be skipped.
    pub(crate) fn acquire_frame(&mut self) -> Result<Option<Frame>> {
        match &self.target {
            RenderTarget::Offscreen { texture } => Ok(Some(Frame {
                view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
                surface_texture: None,
            })),
            RenderTarget::Surface { surface, config } => match surface.get_current_texture() {
                Ok(texture) => Ok(Some(Frame {
                    view: texture
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default()),
                    surface_texture: Some(texture),
                })),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    tracing::debug!("surface lost or outdated; reconfiguring");
                    surface.configure(&self.device, config);
                    Ok(None)
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    tracing::warn!("timed out waiting for the next surface texture");
                    Ok(None)
                }
                Err(err) => Err(FractalError::Environment(format!(
                    "failed to acquire surface texture: {err}"
                ))),
            },
        }
    }
}
