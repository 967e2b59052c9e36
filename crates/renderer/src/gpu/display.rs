use wgpu::util::DeviceExt;

use crate::geometry;

use super::program::GraphicsProgram;

/// Vertex and index buffers for the full-screen quad; immutable after creation.
pub(crate) struct QuadBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

impl QuadBuffers {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad vertices"),
            contents: &geometry::vertex_bytes(),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad indices"),
            contents: geometry::index_bytes(),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertices,
            indices,
            index_count: geometry::index_count(),
        }
    }
}

/// Everything one display iteration binds.
pub(crate) struct DisplayPass<'a> {
    pub program: &'a GraphicsProgram,
    pub texture: &'a wgpu::BindGroup,
    pub quad: &'a QuadBuffers,
    pub clear_color: wgpu::Color,
}

impl DisplayPass<'_> {
    /// Records clear, bind, indexed draw into `encoder`. Bindings end with the pass.
    pub(crate) fn encode(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("fractal display"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(self.clear_color),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.program.pipeline);
        pass.set_bind_group(0, self.texture, &[]);
        pass.set_vertex_buffer(0, self.quad.vertices.slice(..geometry::TEXCOORD_OFFSET));
        pass.set_vertex_buffer(1, self.quad.vertices.slice(geometry::TEXCOORD_OFFSET..));
        pass.set_index_buffer(self.quad.indices.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..self.quad.index_count, 0, 0..1);
    }
}
