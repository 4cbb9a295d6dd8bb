//! Mesh payload: geometry, shader binding and draw state.

use glam::Mat3;

use crate::geometry::Geometry;
use crate::gpu::BufferHandle;
use crate::shader::ShaderId;

/// Solid meshes draw indexed triangles; particle meshes draw their
/// vertices as points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderType {
    #[default]
    Solid,
    Particles,
}

/// How a mesh blends over the frame once it is on the transparent path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendType {
    #[default]
    Normal,
    Additive,
}

/// One GPU buffer slot: the handle plus the byte length it was created
/// with. A same-size update is a plain write, a resize recreates the
/// buffer.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BufferSlot {
    pub handle: Option<BufferHandle>,
    pub byte_len: usize,
}

/// The per-mesh buffer table, filled lazily on first draw.
#[derive(Debug, Default)]
pub(crate) struct MeshBuffers {
    pub vertices: BufferSlot,
    pub normals: BufferSlot,
    pub colors: BufferSlot,
    pub uvs: BufferSlot,
    pub elements: BufferSlot,
}

/// Mesh payload on a node.
#[derive(Debug)]
pub struct MeshData {
    pub geometry: Geometry,
    pub shader: ShaderId,
    pub render_type: RenderType,
    pub blend_type: BlendType,
    /// 0 to 1. Only takes effect while `transparent` is set; the renderer
    /// snaps it back to 1 otherwise.
    pub opacity: f32,
    pub transparent: bool,
    pub depth_test: bool,
    /// Marks geometry that will be edited after upload. Used as the
    /// buffer usage hint.
    pub dynamic: bool,
    pub(crate) buffers: MeshBuffers,
    pub(crate) normals_matrix: Mat3,
}

impl MeshData {
    pub fn new(geometry: Geometry, shader: ShaderId) -> Self {
        Self {
            geometry,
            shader,
            render_type: RenderType::Solid,
            blend_type: BlendType::Normal,
            opacity: 1.0,
            transparent: false,
            depth_test: true,
            dynamic: false,
            buffers: MeshBuffers::default(),
            normals_matrix: Mat3::IDENTITY,
        }
    }

    pub fn with_render_type(mut self, render_type: RenderType) -> Self {
        self.render_type = render_type;
        self
    }

    pub fn with_blend_type(mut self, blend_type: BlendType) -> Self {
        self.blend_type = blend_type;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self.transparent = true;
        self
    }

    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_depth_test(mut self, depth_test: bool) -> Self {
        self.depth_test = depth_test;
        self
    }

    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// The world-space normal matrix as of the last scene update.
    pub fn normals_matrix(&self) -> Mat3 {
        self.normals_matrix
    }

    /// True when this mesh goes through the depth-sorted transparent pass.
    pub fn needs_sorting(&self) -> bool {
        self.transparent || self.blend_type == BlendType::Additive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Geometry {
        Geometry::new(
            vec![0.0; 12],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    #[test]
    fn defaults_follow_solid_opaque() {
        let mesh = MeshData::new(quad(), ShaderId(0));
        assert_eq!(mesh.render_type, RenderType::Solid);
        assert_eq!(mesh.blend_type, BlendType::Normal);
        assert_eq!(mesh.opacity, 1.0);
        assert!(!mesh.transparent);
        assert!(mesh.depth_test);
        assert!(!mesh.dynamic);
        assert!(!mesh.needs_sorting());
    }

    #[test]
    fn additive_meshes_sort_even_when_not_transparent() {
        let mesh = MeshData::new(quad(), ShaderId(0)).with_blend_type(BlendType::Additive);
        assert!(!mesh.transparent);
        assert!(mesh.needs_sorting());
    }

    #[test]
    fn with_opacity_implies_transparent() {
        let mesh = MeshData::new(quad(), ShaderId(0)).with_opacity(0.5);
        assert!(mesh.transparent);
        assert!(mesh.needs_sorting());
    }
}
