//! Scene-graph nodes: shared spatial state plus a role payload.

use glam::{EulerRot, Mat3, Mat4, Vec3};

use crate::gpu::LightKind;
use crate::math;
use crate::scene::{CameraData, LightData, MeshData, NodeId};

/// What a node contributes to the frame beyond its transform.
#[derive(Debug)]
pub enum NodeKind {
    /// Pure transform, used for grouping.
    Group,
    Camera(CameraData),
    Mesh(MeshData),
    Light(LightData),
}

/// A node in the scene graph.
///
/// Transforms are position, XYZ Euler rotation and scale, composed as
/// translation * rotation * scale. A look-at target overrides the Euler
/// angles until it is cleared. Every spatial setter marks the node dirty;
/// `Scene::update` rebuilds only dirty subtrees.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub visible: bool,
    pub kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    position: Vec3,
    rotation: Vec3,
    scale: Vec3,
    up: Vec3,
    target: Option<Vec3>,
    pub(crate) dirty: bool,
    pub(crate) matrix: Mat4,
    pub(crate) world_matrix: Mat4,
}

impl Node {
    pub fn new(name: &str, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            visible: true,
            kind,
            parent: None,
            children: Vec::new(),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            up: Vec3::Y,
            target: None,
            dirty: true,
            matrix: Mat4::IDENTITY,
            world_matrix: Mat4::IDENTITY,
        }
    }

    pub fn group(name: &str) -> Self {
        Self::new(name, NodeKind::Group)
    }

    pub fn mesh(name: &str, mesh: MeshData) -> Self {
        Self::new(name, NodeKind::Mesh(mesh))
    }

    /// A camera node, placed at (0, 0, 1) looking at the origin.
    pub fn camera(camera: CameraData) -> Self {
        let mut node = Self::new("camera", NodeKind::Camera(camera));
        node.position = Vec3::new(0.0, 0.0, 1.0);
        node.target = Some(Vec3::ZERO);
        node
    }

    /// A light node. Directional lights start at (0, 1, 0) aimed at the
    /// origin; the renderer derives their direction from position and
    /// target, so aim them with `set_position` and `look_at`.
    pub fn light(name: &str, light: LightData) -> Self {
        let directional = light.kind == LightKind::Directional;
        let mut node = Self::new(name, NodeKind::Light(light));
        if directional {
            node.position = Vec3::new(0.0, 1.0, 0.0);
            node.target = Some(Vec3::ZERO);
        }
        node
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    /// Moves the node by an offset in its parent's space.
    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
        self.dirty = true;
    }

    /// Euler angles in radians, applied in X, Y, Z order.
    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: Vec3) {
        self.rotation = rotation;
        self.dirty = true;
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.dirty = true;
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn set_up(&mut self, up: Vec3) {
        self.up = up;
        self.dirty = true;
    }

    pub fn target(&self) -> Option<Vec3> {
        self.target
    }

    /// Aims the node at a point. The target keeps overriding the Euler
    /// rotation until `clear_target`.
    pub fn look_at(&mut self, target: Vec3) {
        self.target = Some(target);
        self.dirty = true;
    }

    pub fn clear_target(&mut self) {
        self.target = None;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The local transform as of the last update.
    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    /// The world transform as of the last update.
    pub fn world_matrix(&self) -> Mat4 {
        self.world_matrix
    }

    /// Position in world space as of the last update.
    pub fn world_position(&self) -> Vec3 {
        self.world_matrix.w_axis.truncate()
    }

    pub(crate) fn rebuild_local(&mut self) {
        let rotation = match self.target {
            Some(target) => math::look_at_basis(self.position, target, self.up),
            None => Mat3::from_euler(
                EulerRot::XYZ,
                self.rotation.x,
                self.rotation.y,
                self.rotation.z,
            ),
        };
        self.matrix = Mat4::from_translation(self.position)
            * Mat4::from_mat3(rotation)
            * Mat4::from_scale(self.scale);
    }
}
