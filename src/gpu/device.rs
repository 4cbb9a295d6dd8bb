//! The graphics device abstraction.
//!
//! The renderer drives a [`GpuDevice`] through a small stateful protocol:
//! bind a program, set blend/depth state, stage named uniforms and light
//! slots, bind attribute/index buffers, draw. Two implementations exist —
//! the real wgpu device and a headless recording device for tests.

use glam::{Mat3, Mat4, Vec3};
use thiserror::Error;

use super::types::{BlendMode, BufferKind, BufferUsageHint, LightSlot};
use crate::texture::ImageData;

/// Errors from device construction and resource creation.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("context creation failed: {0}")]
    ContextCreationFailed(String),

    #[error("surface creation failed: {0}")]
    SurfaceCreationFailed(String),

    #[error("no suitable graphics adapter found")]
    AdapterNotFound,

    #[error("device creation failed: {0}")]
    DeviceCreationFailed(String),

    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),

    #[error("surface lost")]
    SurfaceLost,

    #[error("out of GPU memory")]
    OutOfMemory,

    #[error("failed to acquire frame: {0}")]
    FrameAcquireFailed(String),
}

pub type GpuResult<T> = Result<T, GpuError>;

/// Opaque handle to a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Opaque handle to a GPU texture (2D or cube).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Opaque handle to a compiled shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

/// Everything a device needs to compile a shader program.
///
/// Custom uniform and attribute names are declared up front: their position
/// in these lists fixes the uniform-block slot and vertex-buffer location
/// the device assigns to them.
#[derive(Debug, Clone, Default)]
pub struct ProgramDescriptor {
    pub label: String,
    /// WGSL source with `vs_main` and `fs_main` entry points.
    pub source: String,
    pub custom_uniforms: Vec<String>,
    pub custom_attributes: Vec<String>,
}

/// The renderer's only seam to the GPU.
///
/// Uniform setters are name-keyed; names the bound program does not declare
/// are skipped silently. State setters are sticky until changed — the
/// renderer is responsible for deduplicating switches, the device only
/// executes them.
pub trait GpuDevice {
    fn resize(&mut self, width: u32, height: u32);
    fn surface_size(&self) -> (u32, u32);

    /// Starts a frame. `clear` paints color and depth before the first
    /// draw; `None` keeps the previous surface contents.
    fn begin_frame(&mut self, clear: Option<[f32; 4]>) -> GpuResult<()>;

    /// Flushes all recorded draws and presents the frame.
    fn end_frame(&mut self) -> GpuResult<()>;

    /// Discards the frame begun by [`begin_frame`](Self::begin_frame)
    /// without presenting, releasing the acquired surface image.
    fn abort_frame(&mut self);

    /// Compiles and validates a program. Fails fast with
    /// [`GpuError::ShaderCompile`] on invalid source.
    fn create_program(&mut self, desc: &ProgramDescriptor) -> GpuResult<ProgramHandle>;

    /// Makes a program current. Texture bindings are per shader and reset
    /// to the device defaults here; everything else staged stays sticky.
    fn bind_program(&mut self, program: ProgramHandle);

    fn set_blend_mode(&mut self, mode: BlendMode);
    fn set_depth_test(&mut self, enabled: bool);

    fn set_uniform_mat4(&mut self, name: &str, value: &Mat4);
    fn set_uniform_mat3(&mut self, name: &str, value: &Mat3);
    fn set_uniform_vec3(&mut self, name: &str, value: Vec3);
    fn set_uniform_f32(&mut self, name: &str, value: f32);

    /// Writes one entry of the shader light array. Slots at and above
    /// [`MAX_LIGHTS`](super::MAX_LIGHTS) are ignored.
    fn set_light(&mut self, slot: usize, light: LightSlot);

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        usage: BufferUsageHint,
        data: &[u8],
    ) -> GpuResult<BufferHandle>;
    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]);
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Binds a vertex buffer to a named attribute with the given number of
    /// float components per vertex.
    fn bind_attribute(&mut self, name: &str, buffer: BufferHandle, components: u32);
    fn bind_index_buffer(&mut self, buffer: BufferHandle);

    fn create_texture(&mut self, image: &ImageData) -> GpuResult<TextureHandle>;
    fn create_environment(&mut self, faces: &[ImageData; 6]) -> GpuResult<TextureHandle>;

    /// Binds a texture to a named sampler slot on the given unit.
    fn bind_texture(&mut self, name: &str, unit: u32, texture: TextureHandle);

    /// Indexed triangle draw using the bound index buffer.
    fn draw_triangles(&mut self, index_count: u32);

    /// Unindexed point draw over the bound vertex attributes.
    fn draw_points(&mut self, vertex_count: u32);
}

/// Parses and validates WGSL, shared by both device implementations so
/// shader errors surface identically with or without a GPU.
pub(crate) fn validate_wgsl(label: &str, source: &str) -> GpuResult<naga::Module> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| GpuError::ShaderCompile(format!("{label}: {}", e.message())))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    )
    .validate(&module)
    .map_err(|e| GpuError::ShaderCompile(format!("{label}: {}", e.into_inner())))?;

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_minimal_wgsl() {
        let src = "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }";
        assert!(validate_wgsl("minimal", src).is_ok());
    }

    #[test]
    fn validate_rejects_syntax_errors() {
        let err = validate_wgsl("broken", "fn { not wgsl").unwrap_err();
        assert!(matches!(err, GpuError::ShaderCompile(_)));
    }
}
