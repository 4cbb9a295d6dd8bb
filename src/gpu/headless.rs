//! A headless device that records the command stream instead of drawing.
//!
//! Fills the second-implementation slot behind [`GpuDevice`]: tests and CI
//! drive the full renderer against it and assert on the exact order of
//! state changes, uploads and draws. Shader sources still go through naga
//! validation so compile failures behave like the real device.

use glam::{Mat3, Mat4, Vec3};

use super::device::{
    validate_wgsl, BufferHandle, GpuDevice, GpuResult, ProgramDescriptor, ProgramHandle,
    TextureHandle,
};
use super::types::{BlendMode, BufferKind, BufferUsageHint, LightSlot, MAX_LIGHTS};
use crate::texture::ImageData;

/// One recorded protocol call.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    BeginFrame { clear: Option<[f32; 4]> },
    EndFrame,
    AbortFrame,
    Resize { width: u32, height: u32 },
    CreateProgram { handle: ProgramHandle, label: String },
    BindProgram(ProgramHandle),
    SetBlendMode(BlendMode),
    SetDepthTest(bool),
    SetUniformMat4 { name: String, value: Mat4 },
    SetUniformMat3 { name: String, value: Mat3 },
    SetUniformVec3 { name: String, value: Vec3 },
    SetUniformF32 { name: String, value: f32 },
    SetLight { slot: usize, light: LightSlot },
    CreateBuffer { handle: BufferHandle, kind: BufferKind, usage: BufferUsageHint, bytes: usize },
    WriteBuffer { buffer: BufferHandle, bytes: usize },
    DestroyBuffer(BufferHandle),
    BindAttribute { name: String, buffer: BufferHandle, components: u32 },
    BindIndexBuffer(BufferHandle),
    CreateTexture { handle: TextureHandle, width: u32, height: u32 },
    CreateEnvironment { handle: TextureHandle, size: u32 },
    BindTexture { name: String, unit: u32, texture: TextureHandle },
    DrawTriangles { index_count: u32 },
    DrawPoints { vertex_count: u32 },
}

/// Records every [`GpuDevice`] call in order. Handles are handed out from
/// monotone counters; no GPU objects exist.
pub struct HeadlessDevice {
    width: u32,
    height: u32,
    commands: Vec<GpuCommand>,
    next_buffer_id: u64,
    next_texture_id: u64,
    next_program_id: u64,
}

impl HeadlessDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_program_id: 1,
        }
    }

    /// Everything recorded so far, in call order.
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Drains the recording, leaving the device empty for the next frame.
    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Number of draw calls recorded (triangles and points).
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, GpuCommand::DrawTriangles { .. } | GpuCommand::DrawPoints { .. }))
            .count()
    }
}

impl GpuDevice for HeadlessDevice {
    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.commands.push(GpuCommand::Resize { width, height });
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self, clear: Option<[f32; 4]>) -> GpuResult<()> {
        self.commands.push(GpuCommand::BeginFrame { clear });
        Ok(())
    }

    fn end_frame(&mut self) -> GpuResult<()> {
        self.commands.push(GpuCommand::EndFrame);
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.commands.push(GpuCommand::AbortFrame);
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> GpuResult<ProgramHandle> {
        validate_wgsl(&desc.label, &desc.source)?;
        let handle = ProgramHandle(self.next_program_id);
        self.next_program_id += 1;
        self.commands.push(GpuCommand::CreateProgram {
            handle,
            label: desc.label.clone(),
        });
        Ok(handle)
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        self.commands.push(GpuCommand::BindProgram(program));
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.commands.push(GpuCommand::SetBlendMode(mode));
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.commands.push(GpuCommand::SetDepthTest(enabled));
    }

    fn set_uniform_mat4(&mut self, name: &str, value: &Mat4) {
        self.commands.push(GpuCommand::SetUniformMat4 {
            name: name.to_string(),
            value: *value,
        });
    }

    fn set_uniform_mat3(&mut self, name: &str, value: &Mat3) {
        self.commands.push(GpuCommand::SetUniformMat3 {
            name: name.to_string(),
            value: *value,
        });
    }

    fn set_uniform_vec3(&mut self, name: &str, value: Vec3) {
        self.commands.push(GpuCommand::SetUniformVec3 {
            name: name.to_string(),
            value,
        });
    }

    fn set_uniform_f32(&mut self, name: &str, value: f32) {
        self.commands.push(GpuCommand::SetUniformF32 {
            name: name.to_string(),
            value,
        });
    }

    fn set_light(&mut self, slot: usize, light: LightSlot) {
        if slot >= MAX_LIGHTS {
            return;
        }
        self.commands.push(GpuCommand::SetLight { slot, light });
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        usage: BufferUsageHint,
        data: &[u8],
    ) -> GpuResult<BufferHandle> {
        let handle = BufferHandle(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.commands.push(GpuCommand::CreateBuffer {
            handle,
            kind,
            usage,
            bytes: data.len(),
        });
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        self.commands.push(GpuCommand::WriteBuffer {
            buffer,
            bytes: data.len(),
        });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.commands.push(GpuCommand::DestroyBuffer(buffer));
    }

    fn bind_attribute(&mut self, name: &str, buffer: BufferHandle, components: u32) {
        self.commands.push(GpuCommand::BindAttribute {
            name: name.to_string(),
            buffer,
            components,
        });
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle) {
        self.commands.push(GpuCommand::BindIndexBuffer(buffer));
    }

    fn create_texture(&mut self, image: &ImageData) -> GpuResult<TextureHandle> {
        let handle = TextureHandle(self.next_texture_id);
        self.next_texture_id += 1;
        self.commands.push(GpuCommand::CreateTexture {
            handle,
            width: image.width,
            height: image.height,
        });
        Ok(handle)
    }

    fn create_environment(&mut self, faces: &[ImageData; 6]) -> GpuResult<TextureHandle> {
        let handle = TextureHandle(self.next_texture_id);
        self.next_texture_id += 1;
        self.commands.push(GpuCommand::CreateEnvironment {
            handle,
            size: faces[0].width,
        });
        Ok(handle)
    }

    fn bind_texture(&mut self, name: &str, unit: u32, texture: TextureHandle) {
        self.commands.push(GpuCommand::BindTexture {
            name: name.to_string(),
            unit,
            texture,
        });
    }

    fn draw_triangles(&mut self, index_count: u32) {
        self.commands.push(GpuCommand::DrawTriangles { index_count });
    }

    fn draw_points(&mut self, vertex_count: u32) {
        self.commands.push(GpuCommand::DrawPoints { vertex_count });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let mut device = HeadlessDevice::new(640, 480);
        device.begin_frame(Some([0.0; 4])).unwrap();
        device.set_blend_mode(BlendMode::Additive);
        device.draw_triangles(36);
        device.end_frame().unwrap();

        assert_eq!(
            device.commands(),
            &[
                GpuCommand::BeginFrame { clear: Some([0.0; 4]) },
                GpuCommand::SetBlendMode(BlendMode::Additive),
                GpuCommand::DrawTriangles { index_count: 36 },
                GpuCommand::EndFrame,
            ]
        );
        assert_eq!(device.draw_count(), 1);
    }

    #[test]
    fn rejects_invalid_shader_source() {
        let mut device = HeadlessDevice::new(64, 64);
        let err = device
            .create_program(&ProgramDescriptor {
                label: "bad".into(),
                source: "definitely not wgsl".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, super::super::GpuError::ShaderCompile(_)));
    }

    #[test]
    fn out_of_range_light_slots_are_dropped() {
        let mut device = HeadlessDevice::new(64, 64);
        device.set_light(MAX_LIGHTS, LightSlot::OFF);
        assert!(device.commands().is_empty());
    }
}
