use wgpu::util::DeviceExt;

use crate::pipelines::pick::DrawUniform;

/**
 * Bind group carrying the id (or segmentation colour) of one draw.
 *
 * Ids are rendered through a uniform instead of a texture so the id target
 * receives exact integers, which pixel perfect picking relies on.
 */
pub fn draw_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniform: DrawUniform,
) -> wgpu::BindGroup {
    let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Draw id buffer"),
        contents: bytemuck::cast_slice(&[uniform]),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    });
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
        label: Some("draw_bind_group"),
    })
}
