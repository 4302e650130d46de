//! Camera payloads and projection maths.
//!
//! Projections are produced in the OpenGL convention (clip depth in `[-1, 1]`)
//! and converted for wgpu with [`OPENGL_TO_WGPU_MATRIX`]. Keeping the OpenGL
//! form makes the stored depth identical to the classic window depth, so
//! [`Camera::linearize_depth`] works on values read straight from a depth
//! attachment.

use cgmath::{Matrix4, SquareMatrix, Zero};

use crate::config::{DEFAULT_Z_FAR, DEFAULT_Z_NEAR};

/// Remaps OpenGL clip depth `[-1, 1]` to the `[0, 1]` range wgpu expects.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in radians.
        yfov: f32,
        /// `None` places the far plane at infinity.
        zfar: Option<f32>,
        /// `None` uses the viewport's aspect ratio.
        aspect_ratio: Option<f32>,
    },
    Orthographic {
        xmag: f32,
        ymag: f32,
        zfar: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub name: Option<String>,
    pub znear: f32,
    pub projection: Projection,
}

impl Camera {
    pub fn perspective(yfov: f32) -> Self {
        Self {
            name: None,
            znear: DEFAULT_Z_NEAR,
            projection: Projection::Perspective {
                yfov,
                zfar: Some(DEFAULT_Z_FAR),
                aspect_ratio: None,
            },
        }
    }

    pub fn orthographic(xmag: f32, ymag: f32) -> Self {
        Self {
            name: None,
            znear: DEFAULT_Z_NEAR,
            projection: Projection::Orthographic {
                xmag,
                ymag,
                zfar: DEFAULT_Z_FAR,
            },
        }
    }

    pub fn with_clip(mut self, znear: f32, zfar: Option<f32>) -> Self {
        self.znear = znear;
        match &mut self.projection {
            Projection::Perspective { zfar: far, .. } => *far = zfar,
            Projection::Orthographic { zfar: far, .. } => *far = zfar.unwrap_or(DEFAULT_Z_FAR),
        }
        self
    }

    pub fn zfar(&self) -> Option<f32> {
        match self.projection {
            Projection::Perspective { zfar, .. } => zfar,
            Projection::Orthographic { zfar, .. } => Some(zfar),
        }
    }

    /**
     * OpenGL-convention projection matrix for a `width` x `height` viewport.
     *
     * Perspective cameras without an explicit aspect ratio use the viewport's.
     * A missing far plane yields the infinite projection.
     */
    pub fn projection_matrix(&self, width: u32, height: u32) -> Matrix4<f32> {
        let n = self.znear;
        let mut p = Matrix4::zero();
        match self.projection {
            Projection::Perspective {
                yfov,
                zfar,
                aspect_ratio,
            } => {
                let a = aspect_ratio.unwrap_or(width.max(1) as f32 / height.max(1) as f32);
                let t = (yfov / 2.0).tan();
                // cgmath indexes columns first
                p[0][0] = 1.0 / (a * t);
                p[1][1] = 1.0 / t;
                p[2][3] = -1.0;
                match zfar {
                    None => {
                        p[2][2] = -1.0;
                        p[3][2] = -2.0 * n;
                    }
                    Some(f) => {
                        p[2][2] = (f + n) / (n - f);
                        p[3][2] = (2.0 * f * n) / (n - f);
                    }
                }
            }
            Projection::Orthographic { xmag, ymag, zfar } => {
                let f = zfar;
                p[0][0] = 1.0 / xmag;
                p[1][1] = 1.0 / ymag;
                p[2][2] = 2.0 / (n - f);
                p[3][2] = (f + n) / (n - f);
                p[3][3] = 1.0;
            }
        }
        p
    }

    /// Projection ready for the wgpu clip space.
    pub fn wgpu_projection(&self, width: u32, height: u32) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * self.projection_matrix(width, height)
    }

    /**
     * Converts a stored depth value in `[0, 1]` into a linear eye distance.
     *
     * The cleared value `1.0` means nothing was drawn and maps to `0.0`.
     */
    pub fn linearize_depth(&self, depth: f32) -> f32 {
        if depth >= 1.0 {
            return 0.0;
        }
        let n = self.znear;
        let z = 2.0 * depth - 1.0;
        match self.projection {
            Projection::Perspective { zfar: None, .. } => 2.0 * n / (1.0 - z),
            Projection::Perspective { zfar: Some(f), .. } => {
                2.0 * n * f / (f + n - z * (f - n))
            }
            Projection::Orthographic { zfar: f, .. } => ((f + n) + z * (f - n)) / 2.0,
        }
    }
}

/// View matrix for a camera posed at `world`.
pub fn view_matrix(world: &Matrix4<f32>) -> Matrix4<f32> {
    world.invert().unwrap_or_else(|| {
        log::warn!("camera pose is singular, falling back to identity view");
        Matrix4::identity()
    })
}
