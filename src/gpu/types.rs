//! Shared types of the GPU device protocol.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Hard capacity of the shader-side light array. Shared by the renderer's
/// slot-packing loop and the uniform-block layout; changing it means
/// changing the shader source too.
pub const MAX_LIGHTS: usize = 4;

/// Blend state selected per draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Blending disabled.
    #[default]
    Opaque,
    /// Standard alpha blending (src-alpha / one-minus-src-alpha).
    Transparent,
    /// Additive blending (src-alpha / one).
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Upload-frequency hint, mapped to the backend's buffer usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferUsageHint {
    #[default]
    Static,
    Dynamic,
}

/// Light type codes shared with the shader. Ambient never occupies a slot;
/// it only accumulates into the ambient color uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightKind {
    #[default]
    None = 0,
    Ambient = 1,
    Directional = 2,
    Point = 4,
}

/// One entry of the fixed-size shader light array.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSlot {
    pub kind: LightKind,
    /// Normalized direction for directional lights, position for point
    /// lights.
    pub location: Vec3,
    /// Light color, already scaled by intensity.
    pub color: Vec3,
    /// Point-light fall-off distance; unused otherwise.
    pub fall_off: f32,
}

impl LightSlot {
    /// An empty slot.
    pub const OFF: LightSlot = LightSlot {
        kind: LightKind::None,
        location: Vec3::ZERO,
        color: Vec3::ZERO,
        fall_off: 0.0,
    };
}

/// GPU-side layout of one light: `position.w` holds the fall-off distance,
/// `color.w` holds the `LightKind` code.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuLight {
    pub position: [f32; 4],
    pub color: [f32; 4],
}

impl From<LightSlot> for GpuLight {
    fn from(slot: LightSlot) -> Self {
        Self {
            position: [
                slot.location.x,
                slot.location.y,
                slot.location.z,
                slot.fall_off,
            ],
            color: [
                slot.color.x,
                slot.color.y,
                slot.color.z,
                slot.kind as i32 as f32,
            ],
        }
    }
}

/// The per-draw uniform block. Matches the `Uniforms` struct declared in
/// the WGSL shaders; `normal_matrix` is the 3x3 normal matrix stored in the
/// upper-left of a mat4, and `alpha.x` carries the opacity.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UniformBlock {
    pub projection: [[f32; 4]; 4],
    pub model_view: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub ambient: [f32; 4],
    pub eye_position: [f32; 4],
    pub eye_direction: [f32; 4],
    pub lights: [GpuLight; MAX_LIGHTS],
    pub alpha: [f32; 4],
    /// Custom float uniforms, packed in shader declaration order.
    pub custom: [[f32; 4]; 4],
}

impl Default for UniformBlock {
    fn default() -> Self {
        Self {
            projection: glam::Mat4::IDENTITY.to_cols_array_2d(),
            model_view: glam::Mat4::IDENTITY.to_cols_array_2d(),
            normal_matrix: glam::Mat4::IDENTITY.to_cols_array_2d(),
            ambient: [0.0; 4],
            eye_position: [0.0; 4],
            eye_direction: [0.0; 4],
            lights: [GpuLight::from(LightSlot::OFF); MAX_LIGHTS],
            alpha: [1.0, 0.0, 0.0, 0.0],
            custom: [[0.0; 4]; 4],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_kind_codes_match_shader_constants() {
        assert_eq!(LightKind::None as i32, 0);
        assert_eq!(LightKind::Ambient as i32, 1);
        assert_eq!(LightKind::Directional as i32, 2);
        assert_eq!(LightKind::Point as i32, 4);
    }

    #[test]
    fn gpu_light_packs_kind_and_fall_off() {
        let gpu = GpuLight::from(LightSlot {
            kind: LightKind::Point,
            location: Vec3::new(1.0, 2.0, 3.0),
            color: Vec3::new(0.5, 0.25, 0.125),
            fall_off: 200.0,
        });
        assert_eq!(gpu.position, [1.0, 2.0, 3.0, 200.0]);
        assert_eq!(gpu.color, [0.5, 0.25, 0.125, 4.0]);
    }

    #[test]
    fn uniform_block_is_tightly_sized_for_wgsl() {
        // 3 mat4 + 3 vec4 + 4 lights * 2 vec4 + alpha vec4 + 4 custom vec4.
        let expected = 3 * 64 + 3 * 16 + MAX_LIGHTS * 32 + 16 + 4 * 16;
        assert_eq!(std::mem::size_of::<UniformBlock>(), expected);
    }
}
