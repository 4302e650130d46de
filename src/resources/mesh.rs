use wgpu::util::DeviceExt;

use crate::{
    data_structures::model::Primitive,
    shader::VertexFlags,
};

/// Optional vertex streams in the order they are interleaved, with their shader locations.
const SURFACE_ATTRIBUTES: [(VertexFlags, u32, wgpu::VertexFormat); 7] = [
    (VertexFlags::NORMAL, 1, wgpu::VertexFormat::Float32x3),
    (VertexFlags::TANGENT, 2, wgpu::VertexFormat::Float32x4),
    (VertexFlags::TEXCOORD_0, 3, wgpu::VertexFormat::Float32x2),
    (VertexFlags::TEXCOORD_1, 4, wgpu::VertexFormat::Float32x2),
    (VertexFlags::COLOR_0, 5, wgpu::VertexFormat::Float32x4),
    (VertexFlags::JOINTS_0, 6, wgpu::VertexFormat::Uint32x4),
    (VertexFlags::WEIGHTS_0, 7, wgpu::VertexFormat::Float32x4),
];

/// Vertex positions live in their own buffer bound at slot 0.
pub const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];

pub fn position_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &POSITION_ATTRIBUTES,
    }
}

/// Stride and attributes of the interleaved surface stream for `flags`.
///
/// Returns `None` when the primitive has no optional streams.
pub fn surface_layout(flags: VertexFlags) -> Option<(wgpu::BufferAddress, Vec<wgpu::VertexAttribute>)> {
    let mut offset = 0;
    let mut attributes = Vec::new();
    for (flag, location, format) in SURFACE_ATTRIBUTES {
        if flags.contains(flag) {
            attributes.push(wgpu::VertexAttribute {
                format,
                offset,
                shader_location: location,
            });
            offset += format.size();
        }
    }
    (!attributes.is_empty()).then_some((offset, attributes))
}

/// Writes `count` elements of an optional stream, padding short streams with zeros.
fn push_stream<T: bytemuck::Pod + Default>(out: &mut Vec<u8>, stream: &Option<Vec<T>>, i: usize) {
    if let Some(values) = stream {
        let value = values.get(i).copied().unwrap_or_default();
        out.extend_from_slice(bytemuck::bytes_of(&value));
    }
}

/**
 * Interleaves the optional streams of a primitive in [`surface_layout`] order.
 *
 * Streams shorter than the position list are padded with zeros so every
 * vertex has the full stride.
 */
pub fn interleave_surface(primitive: &Primitive) -> Vec<u8> {
    let flags = VertexFlags::of(primitive);
    let Some((stride, _)) = surface_layout(flags) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(stride as usize * primitive.vertex_count());
    for i in 0..primitive.vertex_count() {
        push_stream(&mut out, &primitive.normals, i);
        push_stream(&mut out, &primitive.tangents, i);
        push_stream(&mut out, &primitive.texcoord_0, i);
        push_stream(&mut out, &primitive.texcoord_1, i);
        push_stream(&mut out, &primitive.color_0, i);
        push_stream(&mut out, &primitive.joints_0, i);
        push_stream(&mut out, &primitive.weights_0, i);
    }
    out
}

/// Index list after topology conversion; primitives without indices draw their vertices in order.
pub fn draw_indices(primitive: &Primitive) -> Vec<u32> {
    let indices = primitive
        .indices
        .clone()
        .unwrap_or_else(|| (0..primitive.vertex_count() as u32).collect());
    primitive.mode.convert_indices(indices)
}

/// Uploaded vertex and index buffers of one primitive.
#[derive(Debug)]
pub struct GpuMesh {
    pub positions: wgpu::Buffer,
    /// Interleaved optional streams; `None` when the primitive only has positions.
    pub surface: Option<wgpu::Buffer>,
    pub indices: wgpu::Buffer,
    pub num_elements: u32,
}

impl GpuMesh {
    pub fn new(device: &wgpu::Device, primitive: &Primitive) -> Self {
        let label = format!("{:?}", primitive.id());
        let positions = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Position Buffer")),
            contents: bytemuck::cast_slice(&primitive.positions),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let surface_data = interleave_surface(primitive);
        let surface = (!surface_data.is_empty()).then(|| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Surface Buffer")),
                contents: &surface_data,
                usage: wgpu::BufferUsages::VERTEX,
            })
        });

        let indices = draw_indices(primitive);
        // Zero sized buffers are not bindable; keep a single padding index around.
        let index_data: &[u32] = if indices.is_empty() { &[0] } else { &indices };
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Index Buffer")),
            contents: bytemuck::cast_slice(index_data),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            positions,
            surface,
            indices: index_buffer,
            num_elements: indices.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data_structures::model::{Material, Topology};

    fn triangle() -> Primitive {
        Primitive::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            Arc::new(Material::default()),
        )
    }

    #[test]
    fn layout_offsets_follow_stream_order() {
        let flags = VertexFlags::NORMAL | VertexFlags::TEXCOORD_0 | VertexFlags::JOINTS_0;
        let (stride, attributes) = surface_layout(flags).unwrap();
        assert_eq!(stride, 12 + 8 + 16);
        let placed: Vec<(u32, u64)> = attributes.iter().map(|a| (a.shader_location, a.offset)).collect();
        assert_eq!(placed, vec![(1, 0), (3, 12), (6, 20)]);
        assert!(surface_layout(VertexFlags::empty()).is_none());
        // instance colours are a per-instance stream and never interleaved
        assert!(surface_layout(VertexFlags::INSTANCE_COLOR).is_none());
    }

    #[test]
    fn interleaving_pads_short_streams() {
        let prim = triangle()
            .with_normals(vec![[0.0, 0.0, 1.0]; 3])
            .with_texcoords(vec![[0.5, 0.5]]);
        let bytes = interleave_surface(&prim);
        assert_eq!(bytes.len(), 3 * 20);
        let floats: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!(&floats[0..5], &[0.0, 0.0, 1.0, 0.5, 0.5]);
        assert_eq!(&floats[10..15], &[0.0, 0.0, 1.0, 0.0, 0.0]);
        assert!(interleave_surface(&triangle()).is_empty());
    }

    #[test]
    fn missing_indices_draw_in_order() {
        assert_eq!(draw_indices(&triangle()), vec![0, 1, 2]);
        let fan = Primitive::new(vec![[0.0; 3]; 4], Arc::new(Material::default()))
            .with_mode(Topology::TriangleFan);
        assert_eq!(draw_indices(&fan), vec![0, 1, 2, 0, 2, 3]);
    }
}
