/**
 * Per-draw uniform of the picking and segmentation variants.
 *
 * The picking fragment stage writes `id.x` into the R32Uint target, the
 * segmentation stage writes `color`. Both are padded to 16 bytes since some
 * backends reject smaller uniform bindings.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniform {
    color: [f32; 4],
    id: [u32; 4],
}

impl DrawUniform {
    pub fn pick(id: u32) -> Self {
        Self {
            color: [0.0; 4],
            id: [id, 0, 0, 0],
        }
    }

    /// An opaque segmentation colour given as 8 bit RGB.
    pub fn segmentation(color: [u8; 3]) -> Self {
        let [r, g, b] = color.map(|c| c as f32 / 255.0);
        Self {
            color: [r, g, b, 1.0],
            id: [0; 4],
        }
    }

    pub fn id(&self) -> u32 {
        self.id[0]
    }
}

pub fn mk_draw_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
        label: Some("draw_bind_group_layout"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layout() {
        assert_eq!(std::mem::size_of::<DrawUniform>(), 32);
        assert_eq!(DrawUniform::pick(7).id(), 7);
        let seg = DrawUniform::segmentation([255, 0, 51]);
        assert_eq!(seg.color, [1.0, 0.0, 0.2, 1.0]);
    }
}
