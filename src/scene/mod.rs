//! The scene graph: node arena, shader table and transform propagation.

mod camera;
mod light;
mod mesh;
mod node;

pub use camera::*;
pub use light::*;
pub use mesh::*;
pub use node::*;

use glam::Mat4;
use thiserror::Error;

use crate::math;
use crate::shader::{Shader, ShaderId};

/// Identifies a node in the scene that produced it. Ids die with their
/// node; a freed slot may be reused by a later insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("attaching {child:?} under {parent:?} would create a cycle")]
    CycleDetected { parent: NodeId, child: NodeId },
}

/// A tree of nodes over slot storage, plus the shader assets meshes
/// reference.
///
/// The root is a plain group node that always exists. `update` walks the
/// tree and rebuilds the matrices of dirty subtrees; everything else is
/// left untouched, so calling it twice in a row does no work the second
/// time.
pub struct Scene {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    root: NodeId,
    shaders: Vec<Shader>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node::group("root"))],
            free: Vec::new(),
            root: NodeId(0),
            shaders: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Number of live nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Registers a shader in the scene's asset table.
    pub fn add_shader(&mut self, shader: Shader) -> ShaderId {
        let id = ShaderId(self.shaders.len());
        self.shaders.push(shader);
        id
    }

    pub fn shader(&self, id: ShaderId) -> Option<&Shader> {
        self.shaders.get(id.0)
    }

    pub fn shader_mut(&mut self, id: ShaderId) -> Option<&mut Shader> {
        self.shaders.get_mut(id.0)
    }

    /// Stores a node without attaching it to the tree.
    pub fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Stores a node and attaches it under the root.
    pub fn add(&mut self, node: Node) -> NodeId {
        let id = self.insert(node);
        self.link(self.root, id);
        id
    }

    /// Stores a node and attaches it under `parent`.
    pub fn add_to(&mut self, parent: NodeId, node: Node) -> Result<NodeId, SceneError> {
        if self.node(parent).is_none() {
            return Err(SceneError::UnknownNode(parent));
        }
        let id = self.insert(node);
        self.link(parent, id);
        Ok(id)
    }

    /// Attaches an existing node under `parent`, detaching it from its
    /// current parent first. Attaching a node under itself or under one of
    /// its descendants is rejected.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError> {
        if self.node(child).is_none() {
            return Err(SceneError::UnknownNode(child));
        }
        if self.node(parent).is_none() {
            return Err(SceneError::UnknownNode(parent));
        }
        if self.is_ancestor_or_same(child, parent) {
            return Err(SceneError::CycleDetected { parent, child });
        }
        self.detach(child);
        self.link(parent, child);
        Ok(())
    }

    /// Detaches `child` from `parent`. A no-op when `child` is not among
    /// the parent's children. The detached node stays stored and can be
    /// reattached later.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        let Some(parent_node) = self.node_mut(parent) else {
            return;
        };
        let Some(position) = parent_node.children.iter().position(|&c| c == child) else {
            return;
        };
        parent_node.children.remove(position);
        parent_node.dirty = true;
        if let Some(child_node) = self.node_mut(child) {
            child_node.parent = None;
        }
    }

    /// Frees a node and its whole subtree. Removing the root is a no-op.
    pub fn remove(&mut self, id: NodeId) {
        if id == self.root {
            return;
        }
        if self.node(id).is_none() {
            return;
        }
        self.detach(id);
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes[current.0].take() {
                pending.extend(node.children.iter().copied());
                self.free.push(current.0);
            }
        }
    }

    /// Recomputes world matrices for every dirty subtree, starting at the
    /// root.
    pub fn update(&mut self) {
        self.update_recursive(self.root, Mat4::IDENTITY, false);
    }

    /// Recomputes the subtree rooted at `id`, taking the parent's stored
    /// world matrix as context. Used to refresh a detached branch, for
    /// example a camera that is not part of the drawn tree.
    pub fn update_node(&mut self, id: NodeId) -> Result<(), SceneError> {
        let parent = match self.node(id) {
            Some(node) => node.parent,
            None => return Err(SceneError::UnknownNode(id)),
        };
        let parent_world = parent
            .and_then(|p| self.node(p))
            .map(|p| p.world_matrix)
            .unwrap_or(Mat4::IDENTITY);
        self.update_recursive(id, parent_world, false);
        Ok(())
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(child_node) = self.node_mut(child) {
            child_node.parent = Some(parent);
        }
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.push(child);
            parent_node.dirty = true;
        }
    }

    fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.node(id).and_then(|n| n.parent) else {
            return;
        };
        self.remove_child(parent, id);
    }

    /// True when `node` is `candidate` or one of its ancestors.
    fn is_ancestor_or_same(&self, node: NodeId, candidate: NodeId) -> bool {
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == node {
                return true;
            }
            current = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    fn update_recursive(&mut self, id: NodeId, parent_world: Mat4, parent_dirty: bool) {
        let (world, dirty, children) = {
            let Some(node) = self.node_mut(id) else {
                return;
            };
            let dirty = parent_dirty || node.dirty;
            if dirty {
                node.rebuild_local();
                let world = parent_world * node.matrix;
                node.world_matrix = world;
                match &mut node.kind {
                    NodeKind::Mesh(mesh) => {
                        mesh.normals_matrix = math::normal_matrix(&world);
                    }
                    NodeKind::Camera(camera) => {
                        camera.inverse_matrix =
                            math::try_invert(&world).unwrap_or(Mat4::IDENTITY);
                    }
                    _ => {}
                }
            }
            (node.world_matrix, dirty, node.children.clone())
        };
        for child in children {
            self.update_recursive(child, world, dirty);
        }
        if let Some(node) = self.node_mut(id) {
            node.dirty = false;
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}
