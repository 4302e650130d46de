//! Instance transformation data for GPU rendering.
//!
//! A draw item carries one world matrix per instance. The matrices are packed
//! into [`InstanceRaw`] and streamed as a per-instance vertex buffer so that
//! every instance of a primitive is drawn with a single call.

use cgmath::{Matrix, SquareMatrix};

use crate::data_structures::model;

/**
 * The raw instance is the actual data stored on the GPU.
 *
 * The normal matrix is the inverse transpose of the upper 3x3 block, stored as
 * three padded columns. The `w` of the first column carries the handedness of
 * the world matrix so mirrored instances can flip their tangent frame.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    model: [[f32; 4]; 4],
    normal: [[f32; 4]; 3],
}

impl InstanceRaw {
    pub fn from_matrix(world: &cgmath::Matrix4<f32>) -> Self {
        let upper = cgmath::Matrix3::from_cols(
            world.x.truncate(),
            world.y.truncate(),
            world.z.truncate(),
        );
        let det = upper.determinant();
        let handedness = if det < 0.0 { -1.0 } else { 1.0 };
        // Singular matrices (zero scale) still draw; fall back to the plain rotation block.
        let normal = upper.invert().map(|inv| inv.transpose()).unwrap_or(upper);
        InstanceRaw {
            model: (*world).into(),
            normal: [
                normal.x.extend(handedness).into(),
                normal.y.extend(0.0).into(),
                normal.z.extend(0.0).into(),
            ],
        }
    }

    pub fn model(&self) -> cgmath::Matrix4<f32> {
        self.model.into()
    }

    pub fn handedness(&self) -> f32 {
        self.normal[0][3]
    }
}

/**
 * As we store vertex data directly in the GPU memory we need to tell what the bytes refer to:
 *
 * Stride layout here: world matrix as four vec4 columns followed by the three
 * columns of the normal matrix. Locations 0..8 belong to the primitive's own
 * vertex attributes.
 */
impl model::Vertex for InstanceRaw {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 7] = wgpu::vertex_attr_array![
            8 => Float32x4,
            9 => Float32x4,
            10 => Float32x4,
            11 => Float32x4,
            12 => Float32x4,
            13 => Float32x4,
            14 => Float32x4,
        ];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            // Shaders only advance to the next element once a new instance starts
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &ATTRIBUTES,
        }
    }
}

/// Per-instance RGBA multiplier, bound at location 15.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceColorRaw {
    pub color: [f32; 4],
}

impl model::Vertex for InstanceColorRaw {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![15 => Float32x4];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceColorRaw>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &ATTRIBUTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{Deg, Matrix4, Vector3};

    use super::*;

    #[test]
    fn model_matrix_is_stored_unchanged() {
        let world = Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0)) * Matrix4::from_angle_y(Deg(90.0));
        assert_eq!(InstanceRaw::from_matrix(&world).model(), world);
    }

    #[test]
    fn mirrored_instances_flip_handedness() {
        let mirrored = InstanceRaw::from_matrix(&Matrix4::from_nonuniform_scale(-1.0, 1.0, 1.0));
        assert_eq!(mirrored.handedness(), -1.0);
        let plain = InstanceRaw::from_matrix(&Matrix4::from_scale(2.0));
        assert_eq!(plain.handedness(), 1.0);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let raw = InstanceRaw::from_matrix(&Matrix4::from_nonuniform_scale(2.0, 1.0, 1.0));
        assert!((raw.normal[0][0] - 0.5).abs() < 1e-6);
        assert!((raw.normal[1][1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn singular_matrices_still_give_a_normal_matrix() {
        let raw = InstanceRaw::from_matrix(&Matrix4::from_nonuniform_scale(0.0, 1.0, 1.0));
        assert_eq!(raw.normal[1][1], 1.0);
        assert!(raw.normal.iter().flatten().all(|v| v.is_finite()));
    }
}
