//! Scene Engine - a small scene-graph 3D rendering engine
//!
//! The engine keeps a tree of nodes (groups, meshes, cameras, lights),
//! propagates transforms through it with dirty flags, and draws the
//! visible meshes with a forward pipeline on wgpu.
//!
//! # Features
//! - Arena-backed scene graph with dirty-flag transform propagation
//! - Forward renderer with opaque/transparent partitioning and
//!   back-to-front sorting of the transparent pass
//! - Up to [`MAX_LIGHTS`] directional/point lights plus accumulated ambient
//! - Lazy GPU uploads driven by per-buffer needs-update flags
//! - Swappable GPU device behind the [`GpuDevice`] trait: a real wgpu
//!   implementation and a headless command recorder for tests

pub mod geometry;
pub mod gpu;
pub mod math;
pub mod renderer;
pub mod scene;
pub mod shader;
pub mod texture;
pub mod window;

pub use geometry::Geometry;
pub use gpu::{
    BlendMode, DeviceConfig, GpuDevice, GpuError, HeadlessDevice, WgpuDevice, MAX_LIGHTS,
};
pub use math::MathError;
pub use renderer::{RenderError, Renderer, RendererOptions};
pub use scene::{
    BlendType, CameraData, LightData, MeshData, Node, NodeId, NodeKind, RenderType, Scene,
    SceneError,
};
pub use shader::{Shader, ShaderId};
pub use texture::{EnvironmentMap, ImageData, Texture, TextureError};
pub use window::Window;
