use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::error::Result;
use crate::sync::{FrameSynchronizer, KernelTiming, Ownership};
use crate::types::{DispatchGeometry, FractalConfig};

use super::context::{GpuContext, ResourceReport, OFFSCREEN_FORMAT};
use super::display::{DisplayPass, QuadBuffers};
use super::handoff::{self, DeviceHandoff, KernelTimer};
use super::kernel::ComputeKernel;
use super::program::GraphicsProgram;
use super::texture::SharedTexture;

/// RGBA8 pixels read back from a headless session, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FrameImage {
    /// RGBA of the pixel at `(x, y)`, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let texel = self.pixels.get(offset..offset + 4)?;
        Some([texel[0], texel[1], texel[2], texel[3]])
    }
}

/// Everything one fractal window needs, built once in dependency order.
///
/// Fields are declared in reverse construction order so they drop in reverse:
/// bindings before the texture and pipelines, those before the device and the
/// window surface.
pub struct Session {
    timer: Option<KernelTimer>,
    quad: QuadBuffers,
    display_binding: wgpu::BindGroup,
    kernel_argument: wgpu::BindGroup,
    texture: SharedTexture,
    kernel: ComputeKernel,
    program: GraphicsProgram,
    synchronizer: FrameSynchronizer,
    clear_color: wgpu::Color,
    context: GpuContext,
}

impl Session {
    /// Builds a session that presents into `window`.
    pub fn new(window: Arc<Window>, config: &FractalConfig) -> Result<Self> {
        let geometry = config.validate()?;
        let context = GpuContext::for_window(window)?;
        Self::assemble(context, config, geometry)
    }

    /// Builds a session that renders into an offscreen target of the texture's size.
    pub fn headless(config: &FractalConfig) -> Result<Self> {
        let geometry = config.validate()?;
        let (width, height) = config.size;
        let context = GpuContext::headless(PhysicalSize::new(width, height))?;
        Self::assemble(context, config, geometry)
    }

    fn assemble(
        context: GpuContext,
        config: &FractalConfig,
        geometry: DispatchGeometry,
    ) -> Result<Self> {
        let device = &context.device;
        let linear_filtering = context.support.linear_filtering;

        let program = GraphicsProgram::build(
            device,
            &config.shaders,
            context.target_format,
            linear_filtering,
        )?;
        let kernel = ComputeKernel::build(device, config)?;

        let [width, height] = geometry.global();
        let texture = SharedTexture::create(device, width, height, linear_filtering)?;
        let kernel_argument = texture.bind_kernel_argument(device, &kernel.argument_layout)?;
        let display_binding = texture.bind_for_display(device, &program.texture_layout)?;

        let quad = QuadBuffers::new(device);
        let timer = context.support.timestamps.then(|| KernelTimer::new(device));

        tracing::info!(
            width,
            height,
            kernel = kernel.entry(),
            groups = ?geometry.groups(),
            "fractal session ready"
        );

        Ok(Self {
            timer,
            quad,
            display_binding,
            kernel_argument,
            texture,
            kernel,
            program,
            synchronizer: FrameSynchronizer::new(geometry),
            clear_color: config.clear_color,
            context,
        })
    }

    /// Backend identification for the startup banner.
    pub fn banner(&self) -> String {
        self.context.banner()
    }

    pub fn ownership(&self) -> Ownership {
        self.texture.ownership()
    }

    /// Number of kernel passes completed so far.
    pub fn kernel_passes(&self) -> u64 {
        self.texture.completed_handoffs()
    }

    /// Runs the kernel over the whole texture and waits for it.
    ///
    /// Called once before the display loop starts. Calling it again later
    /// re-dispatches with the same protocol, which is how an interactive
    /// view would refresh the image.
    pub fn recompute(&mut self) -> Result<KernelTiming> {
        let mut backend = DeviceHandoff::new(
            &self.context.device,
            &self.context.queue,
            &self.kernel,
            &self.kernel_argument,
            self.timer.as_ref(),
        );
        let timing = self.texture.handoff(&self.synchronizer, &mut backend)?;
        Ok(timing)
    }

    /// One display iteration: clear, draw the quad, present.
    pub fn render_frame(&mut self) -> Result<()> {
        self.texture.ensure_graphics_owned()?;
        let Some(frame) = self.context.acquire_frame()? else {
            return Ok(());
        };

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("display frame"),
            });
        DisplayPass {
            program: &self.program,
            texture: &self.display_binding,
            quad: &self.quad,
            clear_color: self.clear_color,
        }
        .encode(&mut encoder, &frame.view);
        self.context.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        self.context.resize(size);
    }

    /// Renders one frame offscreen and reads it back.
    pub fn read_frame(&mut self) -> Result<FrameImage> {
        self.context.offscreen_target()?;
        self.render_frame()?;
        let texture = self.context.offscreen_target()?;
        debug_assert_eq!(texture.format(), OFFSCREEN_FORMAT);
        let size = texture.size();
        let pixels = read_texture(&self.context.device, &self.context.queue, texture, 4)?;
        Ok(FrameImage {
            width: size.width,
            height: size.height,
            pixels,
        })
    }

    /// Reads the shared texture back as RGBA32F texels, top row first.
    pub fn read_texels(&self) -> Result<Vec<[f32; 4]>> {
        let texture = self.texture.texture()?;
        let bytes = read_texture(&self.context.device, &self.context.queue, texture, 16)?;
        Ok(bytes
            .chunks_exact(16)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Handle counts on this session's instance; stays readable after the
    /// session is dropped.
    #[doc(hidden)]
    pub fn resource_report(&self) -> ResourceReport {
        self.context.resource_report()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::debug!(
            kernel_passes = self.texture.completed_handoffs(),
            "releasing fractal session"
        );
    }
}

/// Copies a whole texture into host memory, dropping row padding.
fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    bytes_per_texel: u32,
) -> Result<Vec<u8>> {
    let size = texture.size();
    let unpadded = size.width * bytes_per_texel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = unpadded.div_ceil(align) * align;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("texture readback"),
        size: u64::from(padded) * u64::from(size.height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("texture readback"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(size.height),
            },
        },
        wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let pixels = handoff::read_mapped(device, &buffer, "texture readback", |bytes| {
        let mut pixels = Vec::with_capacity((unpadded * size.height) as usize);
        for row in bytes.chunks(padded as usize).take(size.height as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
        pixels
    })?;
    Ok(pixels)
}
