//! Punctual light payloads.
//!
//! Lights are attached to nodes; their position is the node's world
//! translation and they shine along the node's local `-Z` axis.

use std::f32::consts::FRAC_PI_4;

/// The three light categories; each gets its own cap, uniform array and shadow target kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LightType {
    Directional,
    Spot,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional,
    Point {
        /// Cutoff distance; `None` is unbounded.
        range: Option<f32>,
    },
    Spot {
        range: Option<f32>,
        inner_cone_angle: f32,
        outer_cone_angle: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub name: Option<String>,
    pub color: [f32; 3],
    /// Lux for directional lights, candela for point and spot lights.
    pub intensity: f32,
    pub casts_shadow: bool,
    pub kind: LightKind,
}

impl Light {
    fn new(kind: LightKind) -> Self {
        Self {
            name: None,
            color: [1.0; 3],
            intensity: 1.0,
            casts_shadow: false,
            kind,
        }
    }

    pub fn directional() -> Self {
        Self::new(LightKind::Directional)
    }

    pub fn point() -> Self {
        Self::new(LightKind::Point { range: None })
    }

    pub fn spot() -> Self {
        Self::new(LightKind::Spot {
            range: None,
            inner_cone_angle: 0.0,
            outer_cone_angle: FRAC_PI_4,
        })
    }

    pub fn with_color(mut self, color: [f32; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_shadow(mut self, casts_shadow: bool) -> Self {
        self.casts_shadow = casts_shadow;
        self
    }

    pub fn ty(&self) -> LightType {
        match self.kind {
            LightKind::Directional => LightType::Directional,
            LightKind::Point { .. } => LightType::Point,
            LightKind::Spot { .. } => LightType::Spot,
        }
    }

    pub fn range(&self) -> Option<f32> {
        match self.kind {
            LightKind::Directional => None,
            LightKind::Point { range } | LightKind::Spot { range, .. } => range,
        }
    }

    /**
     * Angular attenuation terms `(scale, offset)` of a spot light.
     *
     * The shader evaluates `clamp(cos_theta * scale + offset, 0, 1)^2`, which
     * is one inside the inner cone and falls to zero at the outer cone. Non-spot
     * lights return `(0, 1)` so the attenuation is a no-op.
     */
    pub fn cone_uniforms(&self) -> (f32, f32) {
        match self.kind {
            LightKind::Spot {
                inner_cone_angle,
                outer_cone_angle,
                ..
            } => {
                let scale = 1.0 / (inner_cone_angle.cos() - outer_cone_angle.cos()).max(0.001);
                let offset = -outer_cone_angle.cos() * scale;
                (scale, offset)
            }
            _ => (0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_cone_terms() {
        let light = Light::spot();
        let (scale, offset) = light.cone_uniforms();
        let expected = 1.0 / (1.0 - FRAC_PI_4.cos());
        assert!((scale - expected).abs() < 1e-4);
        assert!((offset + FRAC_PI_4.cos() * expected).abs() < 1e-4);
        // fully lit on the axis, dark at the outer edge
        assert!((1.0 * scale + offset - 1.0).abs() < 1e-4);
        assert!((FRAC_PI_4.cos() * scale + offset).abs() < 1e-4);
    }

    #[test]
    fn degenerate_cone_is_clamped() {
        let light = Light::new(LightKind::Spot {
            range: None,
            inner_cone_angle: 0.5,
            outer_cone_angle: 0.5,
        });
        let (scale, _) = light.cone_uniforms();
        assert!((scale - 1000.0).abs() < 1e-2);
    }

    #[test]
    fn kinds_map_to_types() {
        assert_eq!(Light::directional().ty(), LightType::Directional);
        assert_eq!(Light::point().ty(), LightType::Point);
        assert_eq!(Light::spot().ty(), LightType::Spot);
        assert_eq!(Light::point().range(), None);
    }
}
