//! GPU device abstraction and its implementations.

pub mod device;
pub mod headless;
pub mod types;
pub mod wgpu_device;

pub use device::{
    BufferHandle, GpuDevice, GpuError, GpuResult, ProgramDescriptor, ProgramHandle, TextureHandle,
};
pub use headless::{GpuCommand, HeadlessDevice};
pub use types::{
    BlendMode, BufferKind, BufferUsageHint, GpuLight, LightKind, LightSlot, UniformBlock,
    MAX_LIGHTS,
};
pub use wgpu_device::{DeviceConfig, WgpuDevice};
