//! Light payloads for scene nodes.

use glam::Vec3;

use crate::gpu::LightKind;

/// Light payload on a node. The color is stored already scaled by the
/// intensity, so a half-intensity white light holds (0.5, 0.5, 0.5).
#[derive(Debug, Clone)]
pub struct LightData {
    pub kind: LightKind,
    pub color: Vec3,
    /// Distance at which a point light reaches zero. Unused by the other
    /// kinds.
    pub fall_off: f32,
}

impl LightData {
    /// Uniform base lighting, summed into the ambient term instead of
    /// occupying a light slot.
    pub fn ambient(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Ambient,
            color: color * intensity,
            fall_off: 0.0,
        }
    }

    /// A light shining from the node's position towards its target.
    pub fn directional(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            color: color * intensity,
            fall_off: 0.0,
        }
    }

    /// A light radiating from the node's position.
    pub fn point(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point,
            color: color * intensity,
            fall_off: 200.0,
        }
    }

    pub fn with_fall_off(mut self, fall_off: f32) -> Self {
        self.fall_off = fall_off;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intensity_scales_color_up_front() {
        let light = LightData::directional(Vec3::new(1.0, 0.5, 0.0), 0.5);
        assert_eq!(light.color, Vec3::new(0.5, 0.25, 0.0));
    }

    #[test]
    fn point_light_default_fall_off() {
        let light = LightData::point(Vec3::ONE, 1.0);
        assert_eq!(light.fall_off, 200.0);
        assert_eq!(light.with_fall_off(50.0).fall_off, 50.0);
    }
}
