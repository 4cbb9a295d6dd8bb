//! The forward renderer: walks an updated scene, sorts what it found and
//! turns it into device commands.

use glam::{Mat4, Vec3};
use thiserror::Error;

use crate::gpu::{
    BlendMode, BufferKind, BufferUsageHint, GpuDevice, GpuError, LightKind, LightSlot, MAX_LIGHTS,
};
use crate::scene::{BlendType, BufferSlot, NodeId, NodeKind, RenderType, Scene, SceneError};
use crate::shader::{names, ShaderId, UniformValue};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error("render target node is not a camera")]
    NotACamera,
}

#[derive(Debug, Clone, Copy)]
pub struct RendererOptions {
    /// Clear the frame before drawing.
    pub auto_clear: bool,
    pub clear_color: [f32; 4],
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            auto_clear: true,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// A mesh picked up during classification, with its world-space depth for
/// the transparent sort.
#[derive(Debug, Clone, Copy)]
struct DrawItem {
    node: NodeId,
    depth: f32,
}

/// Draws a scene through any [`GpuDevice`].
///
/// A frame is: update transforms, classify meshes into an opaque and a
/// depth-sorted transparent list while collecting lights, then draw both
/// lists with as few program and blend switches as the draw order allows.
/// Programs, buffers and textures upload lazily the first frame their
/// owner is drawn.
pub struct Renderer<D: GpuDevice> {
    device: D,
    options: RendererOptions,
    opaque: Vec<DrawItem>,
    transparent: Vec<DrawItem>,
    lights: Vec<LightSlot>,
    view_projection: Mat4,
    eye_position: Vec3,
    eye_direction: Vec3,
    last_shader: Option<ShaderId>,
    last_blend: Option<BlendMode>,
}

impl<D: GpuDevice> Renderer<D> {
    pub fn new(device: D) -> Self {
        Self::with_options(device, RendererOptions::default())
    }

    pub fn with_options(device: D, options: RendererOptions) -> Self {
        Self {
            device,
            options,
            opaque: Vec::new(),
            transparent: Vec::new(),
            lights: Vec::new(),
            view_projection: Mat4::IDENTITY,
            eye_position: Vec3::ZERO,
            eye_direction: Vec3::ZERO,
            last_shader: None,
            last_blend: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn options_mut(&mut self) -> &mut RendererOptions {
        &mut self.options
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.device.resize(width, height);
    }

    /// Draws one frame of `scene` through `camera`.
    ///
    /// The camera may live outside the rendered tree; it is updated first
    /// either way. Meshes whose shader fails to compile abort the frame
    /// with the compile error; the acquired surface image is discarded
    /// unpresented so the swapchain queue stays clean.
    pub fn render(&mut self, scene: &mut Scene, camera: NodeId) -> Result<(), RenderError> {
        self.opaque.clear();
        self.transparent.clear();
        self.lights.clear();
        self.last_shader = None;
        self.last_blend = None;

        let clear = self.options.auto_clear.then_some(self.options.clear_color);
        self.device.begin_frame(clear)?;

        if let Err(e) = self.render_frame(scene, camera) {
            self.device.abort_frame();
            return Err(e);
        }

        self.device.end_frame()?;
        Ok(())
    }

    fn render_frame(&mut self, scene: &mut Scene, camera: NodeId) -> Result<(), RenderError> {
        scene.update_node(camera)?;
        scene.update();

        let (projection, view, eye_position) = {
            let node = scene
                .node(camera)
                .ok_or(SceneError::UnknownNode(camera))?;
            let NodeKind::Camera(data) = &node.kind else {
                return Err(RenderError::NotACamera);
            };
            (data.projection(), data.inverse_matrix(), node.position())
        };
        self.view_projection = projection * view;
        self.eye_position = eye_position;
        self.eye_direction = (-eye_position).normalize_or_zero();

        let root = scene.root();
        self.collect(scene, root)?;

        // transparent meshes draw far to near over world depth
        self.transparent.sort_by(|a, b| b.depth.total_cmp(&a.depth));

        let opaque = std::mem::take(&mut self.opaque);
        for item in &opaque {
            self.draw_mesh(scene, item.node)?;
        }
        self.opaque = opaque;

        let transparent = std::mem::take(&mut self.transparent);
        for item in &transparent {
            self.draw_mesh(scene, item.node)?;
        }
        self.transparent = transparent;

        Ok(())
    }

    /// Depth-first pre-order walk. Invisible nodes hide their whole
    /// subtree. Meshes are prepared (program + buffers) as they are found,
    /// so a broken shader surfaces here rather than mid-draw.
    fn collect(&mut self, scene: &mut Scene, id: NodeId) -> Result<(), RenderError> {
        enum Role {
            Other,
            Light(LightSlot),
            Mesh,
        }

        let (role, children) = {
            let Some(node) = scene.node(id) else {
                return Ok(());
            };
            if !node.visible {
                return Ok(());
            }
            let role = match &node.kind {
                NodeKind::Light(data) => {
                    let location = match data.kind {
                        LightKind::Directional => {
                            let target = node.target().unwrap_or(Vec3::ZERO);
                            (node.position() - target).normalize_or_zero()
                        }
                        _ => node.position(),
                    };
                    Role::Light(LightSlot {
                        kind: data.kind,
                        location,
                        color: data.color,
                        fall_off: data.fall_off,
                    })
                }
                NodeKind::Mesh(_) => Role::Mesh,
                _ => Role::Other,
            };
            (role, node.children().to_vec())
        };

        match role {
            Role::Light(slot) => self.lights.push(slot),
            Role::Mesh => self.prepare_mesh(scene, id)?,
            Role::Other => {}
        }

        for child in children {
            self.collect(scene, child)?;
        }
        Ok(())
    }

    /// Compiles the mesh's shader and uploads its geometry if needed, then
    /// files it into the opaque or transparent list.
    fn prepare_mesh(&mut self, scene: &mut Scene, id: NodeId) -> Result<(), RenderError> {
        let shader_id = {
            let Some(node) = scene.node(id) else {
                return Ok(());
            };
            let NodeKind::Mesh(mesh) = &node.kind else {
                return Ok(());
            };
            mesh.shader
        };

        let Some(shader) = scene.shader_mut(shader_id) else {
            log::warn!("mesh {id:?} references missing shader {shader_id:?}, skipping");
            return Ok(());
        };
        if shader.program.is_none() {
            shader.program = Some(self.device.create_program(&shader.descriptor())?);
        }

        let Some(node) = scene.node_mut(id) else {
            return Ok(());
        };
        let depth = node.world_matrix().w_axis.z;
        let NodeKind::Mesh(mesh) = &mut node.kind else {
            return Ok(());
        };

        let vertex_count = mesh.geometry.vertex_count() as usize;
        if vertex_count == 0 {
            return Ok(());
        }
        if mesh.render_type == RenderType::Solid && mesh.geometry.index_count() == 0 {
            return Ok(());
        }

        let usage = if mesh.dynamic {
            BufferUsageHint::Dynamic
        } else {
            BufferUsageHint::Static
        };

        let flag = mesh.geometry.vertices_need_update;
        self.upload_buffer(
            &mut mesh.buffers.vertices,
            BufferKind::Vertex,
            usage,
            mesh.geometry.vertex_bytes(),
            flag,
        )?;
        mesh.geometry.vertices_need_update = false;

        // Colors default to white so untinted geometry keeps its texture
        // and lighting.
        let color_fill;
        let color_bytes = if mesh.geometry.colors.is_empty() {
            color_fill = vec![1.0f32; vertex_count * 3];
            bytemuck::cast_slice(&color_fill)
        } else {
            mesh.geometry.color_bytes()
        };
        let flag = mesh.geometry.colors_need_update;
        self.upload_buffer(
            &mut mesh.buffers.colors,
            BufferKind::Vertex,
            usage,
            color_bytes,
            flag,
        )?;
        mesh.geometry.colors_need_update = false;

        if mesh.render_type == RenderType::Solid {
            let normal_fill;
            let normal_bytes = if mesh.geometry.normals.is_empty() {
                normal_fill = vec![0.0f32; vertex_count * 3];
                bytemuck::cast_slice(&normal_fill)
            } else {
                mesh.geometry.normal_bytes()
            };
            let flag = mesh.geometry.normals_need_update;
            self.upload_buffer(
                &mut mesh.buffers.normals,
                BufferKind::Vertex,
                usage,
                normal_bytes,
                flag,
            )?;
            mesh.geometry.normals_need_update = false;

            let uv_fill;
            let uv_bytes = if mesh.geometry.uvs.is_empty() {
                uv_fill = vec![0.0f32; vertex_count * 2];
                bytemuck::cast_slice(&uv_fill)
            } else {
                mesh.geometry.uv_bytes()
            };
            let flag = mesh.geometry.uvs_need_update;
            self.upload_buffer(
                &mut mesh.buffers.uvs,
                BufferKind::Vertex,
                usage,
                uv_bytes,
                flag,
            )?;
            mesh.geometry.uvs_need_update = false;

            let flag = mesh.geometry.elements_need_update;
            self.upload_buffer(
                &mut mesh.buffers.elements,
                BufferKind::Index,
                usage,
                mesh.geometry.index_bytes(),
                flag,
            )?;
            mesh.geometry.elements_need_update = false;
        }

        let item = DrawItem { node: id, depth };
        if mesh.needs_sorting() {
            self.transparent.push(item);
        } else {
            self.opaque.push(item);
        }
        Ok(())
    }

    fn upload_buffer(
        &mut self,
        slot: &mut BufferSlot,
        kind: BufferKind,
        usage: BufferUsageHint,
        bytes: &[u8],
        needs_update: bool,
    ) -> Result<(), GpuError> {
        if !needs_update && slot.handle.is_some() {
            return Ok(());
        }
        match slot.handle {
            Some(handle) if slot.byte_len == bytes.len() => {
                self.device.write_buffer(handle, bytes);
            }
            Some(handle) => {
                self.device.destroy_buffer(handle);
                slot.handle = Some(self.device.create_buffer(kind, usage, bytes)?);
                slot.byte_len = bytes.len();
            }
            None => {
                slot.handle = Some(self.device.create_buffer(kind, usage, bytes)?);
                slot.byte_len = bytes.len();
            }
        }
        Ok(())
    }

    fn draw_mesh(&mut self, scene: &mut Scene, id: NodeId) -> Result<(), RenderError> {
        let Some(node) = scene.node_mut(id) else {
            return Ok(());
        };
        let world = node.world_matrix();
        let NodeKind::Mesh(mesh) = &mut node.kind else {
            return Ok(());
        };

        // opacity only applies on the transparent path
        if !mesh.transparent {
            mesh.opacity = 1.0;
        }

        let shader_id = mesh.shader;
        let render_type = mesh.render_type;
        let opacity = mesh.opacity;
        let depth_test = mesh.depth_test;
        let normals_matrix = mesh.normals_matrix;
        let blend = if mesh.blend_type == BlendType::Additive {
            BlendMode::Additive
        } else if mesh.transparent {
            BlendMode::Transparent
        } else {
            BlendMode::Opaque
        };
        let vertex_count = mesh.geometry.vertex_count();
        let index_count = mesh.geometry.index_count();
        let vertices = mesh.buffers.vertices.handle;
        let normals = mesh.buffers.normals.handle;
        let colors = mesh.buffers.colors.handle;
        let uvs = mesh.buffers.uvs.handle;
        let elements = mesh.buffers.elements.handle;

        let Some(program) = scene.shader(shader_id).and_then(|s| s.program) else {
            return Ok(());
        };

        if self.last_blend != Some(blend) {
            self.device.set_blend_mode(blend);
            self.last_blend = Some(blend);
        }

        // the combined view-projection only needs uploading when the
        // program changes
        if self.last_shader != Some(shader_id) {
            self.device.bind_program(program);
            self.device
                .set_uniform_mat4(names::UNIFORM_PROJECTION, &self.view_projection);
            self.last_shader = Some(shader_id);
        }

        self.device.set_uniform_f32(names::UNIFORM_ALPHA, opacity);
        self.device.set_depth_test(depth_test);

        // Fill the light slots in collection order until they run out.
        // Ambient lights are summed aside instead of taking a slot.
        let mut ambient = Vec3::ZERO;
        let mut slot = 0;
        for light in &self.lights {
            if slot >= MAX_LIGHTS {
                break;
            }
            if light.kind == LightKind::Ambient {
                ambient += light.color;
            } else {
                self.device.set_light(slot, *light);
                slot += 1;
            }
        }
        for empty in slot..MAX_LIGHTS {
            self.device.set_light(empty, LightSlot::OFF);
        }
        self.device
            .set_uniform_vec3(names::UNIFORM_AMBIENT, ambient);

        if let Some(shader) = scene.shader(shader_id) {
            for (name, value) in shader.custom_uniforms() {
                match value {
                    UniformValue::Float(v) => self.device.set_uniform_f32(name, v),
                }
            }
        }

        if let Some(shader) = scene.shader_mut(shader_id) {
            for (name, attr) in shader.custom_attributes_mut() {
                if attr.needs_update {
                    let bytes: &[u8] = bytemuck::cast_slice(&attr.values);
                    match attr.buffer {
                        Some(handle) if attr.uploaded_len == bytes.len() => {
                            self.device.write_buffer(handle, bytes);
                        }
                        Some(handle) => {
                            self.device.destroy_buffer(handle);
                            attr.buffer = Some(self.device.create_buffer(
                                BufferKind::Vertex,
                                BufferUsageHint::Static,
                                bytes,
                            )?);
                            attr.uploaded_len = bytes.len();
                        }
                        None => {
                            attr.buffer = Some(self.device.create_buffer(
                                BufferKind::Vertex,
                                BufferUsageHint::Static,
                                bytes,
                            )?);
                            attr.uploaded_len = bytes.len();
                        }
                    }
                    attr.needs_update = false;
                }
                if let Some(handle) = attr.buffer {
                    self.device.bind_attribute(name, handle, 1);
                }
            }
        }

        self.device
            .set_uniform_vec3(names::UNIFORM_EYE_POSITION, self.eye_position);
        self.device
            .set_uniform_vec3(names::UNIFORM_EYE_DIRECTION, self.eye_direction);
        self.device
            .set_uniform_mat4(names::UNIFORM_MODEL_VIEW, &world);
        self.device
            .set_uniform_mat3(names::UNIFORM_NORMAL_MATRIX, &normals_matrix);

        // Textures upload the first time they are seen ready; the handle
        // stays cached on the resource. Particles never sample the diffuse
        // texture.
        let mut texture_handle = None;
        let mut environment_handle = None;
        if let Some(shader) = scene.shader_mut(shader_id) {
            if render_type == RenderType::Solid {
                if let Some(texture) = shader.texture.as_mut() {
                    if texture.is_ready() {
                        if texture.gpu.is_none() {
                            texture.gpu = Some(self.device.create_texture(texture.image())?);
                        }
                        texture_handle = texture.gpu;
                    }
                }
            }
            if let Some(environment) = shader.environment.as_mut() {
                if environment.is_ready() {
                    if environment.gpu.is_none() {
                        environment.gpu =
                            Some(self.device.create_environment(environment.faces())?);
                    }
                    environment_handle = environment.gpu;
                }
            }
        }
        if let Some(handle) = texture_handle {
            self.device.bind_texture(names::UNIFORM_TEXTURE, 0, handle);
        }
        if let Some(handle) = environment_handle {
            self.device
                .bind_texture(names::UNIFORM_ENVIRONMENT, 1, handle);
        }

        match render_type {
            RenderType::Solid => {
                if let (Some(n), Some(c), Some(u), Some(v), Some(e)) =
                    (normals, colors, uvs, vertices, elements)
                {
                    self.device.bind_attribute(names::ATTRIBUTE_NORMAL, n, 3);
                    self.device.bind_attribute(names::ATTRIBUTE_COLOR, c, 3);
                    self.device.bind_attribute(names::ATTRIBUTE_UV, u, 2);
                    self.device.bind_attribute(names::ATTRIBUTE_POSITION, v, 3);
                    self.device.bind_index_buffer(e);
                    self.device.draw_triangles(index_count);
                }
            }
            RenderType::Particles => {
                if let (Some(c), Some(v)) = (colors, vertices) {
                    self.device.bind_attribute(names::ATTRIBUTE_COLOR, c, 3);
                    self.device.bind_attribute(names::ATTRIBUTE_POSITION, v, 3);
                    self.device.draw_points(vertex_count);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::gpu::{GpuCommand, HeadlessDevice};
    use crate::scene::{CameraData, LightData, MeshData, Node};
    use crate::shader::Shader;
    use crate::texture::{ImageData, Texture};

    fn quad() -> Geometry {
        Geometry::new(
            vec![
                -1.0, -1.0, 0.0, //
                1.0, -1.0, 0.0, //
                1.0, 1.0, 0.0, //
                -1.0, 1.0, 0.0,
            ],
            vec![
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0,
            ],
            vec![1.0; 12],
            vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    fn scene_with_camera() -> (Scene, NodeId) {
        let mut scene = Scene::new();
        let camera = scene.add(Node::camera(CameraData::default()));
        scene
            .node_mut(camera)
            .unwrap()
            .set_position(glam::Vec3::new(0.0, 0.0, 5.0));
        (scene, camera)
    }

    fn renderer() -> Renderer<HeadlessDevice> {
        Renderer::new(HeadlessDevice::new(640, 480))
    }

    fn blend_modes(commands: &[GpuCommand]) -> Vec<BlendMode> {
        commands
            .iter()
            .filter_map(|c| match c {
                GpuCommand::SetBlendMode(mode) => Some(*mode),
                _ => None,
            })
            .collect()
    }

    fn model_view_depths(commands: &[GpuCommand]) -> Vec<f32> {
        commands
            .iter()
            .filter_map(|c| match c {
                GpuCommand::SetUniformMat4 { name, value } if name == names::UNIFORM_MODEL_VIEW => {
                    Some(value.w_axis.z)
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn frame_is_bracketed_by_clear_and_present() {
        let (mut scene, camera) = scene_with_camera();
        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        let commands = renderer.device().commands();
        assert_eq!(
            commands.first(),
            Some(&GpuCommand::BeginFrame {
                clear: Some([0.0, 0.0, 0.0, 0.0])
            })
        );
        assert_eq!(commands.last(), Some(&GpuCommand::EndFrame));
    }

    #[test]
    fn auto_clear_off_loads_the_previous_frame() {
        let (mut scene, camera) = scene_with_camera();
        let mut renderer = Renderer::with_options(
            HeadlessDevice::new(640, 480),
            RendererOptions {
                auto_clear: false,
                ..Default::default()
            },
        );
        renderer.render(&mut scene, camera).unwrap();
        assert_eq!(
            renderer.device().commands().first(),
            Some(&GpuCommand::BeginFrame { clear: None })
        );
    }

    #[test]
    fn camera_and_mesh_matrices_settle_after_render() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        let cube = scene.add(Node::mesh("cube", MeshData::new(quad(), shader)));
        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        // mesh at the root: world equals local
        let node = scene.node(cube).unwrap();
        assert_eq!(node.world_matrix(), node.matrix());
        assert!(!node.is_dirty());

        // the camera's view is the inverse of its world transform
        let camera_node = scene.node(camera).unwrap();
        let NodeKind::Camera(data) = &camera_node.kind else {
            panic!("not a camera");
        };
        let round_trip = data.inverse_matrix() * camera_node.world_matrix();
        assert!(round_trip.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn eye_uniforms_derive_from_the_camera_position() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        scene.add(Node::mesh("m", MeshData::new(quad(), shader)));
        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        let mut eye_position = None;
        let mut eye_direction = None;
        for command in renderer.device().commands() {
            if let GpuCommand::SetUniformVec3 { name, value } = command {
                match name.as_str() {
                    names::UNIFORM_EYE_POSITION => eye_position = Some(*value),
                    names::UNIFORM_EYE_DIRECTION => eye_direction = Some(*value),
                    _ => {}
                }
            }
        }
        assert_eq!(eye_position, Some(glam::Vec3::new(0.0, 0.0, 5.0)));
        assert_eq!(eye_direction, Some(glam::Vec3::new(0.0, 0.0, -1.0)));
    }

    #[test]
    fn opaque_draws_before_transparent_regardless_of_scene_order() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        scene.add(Node::mesh(
            "see-through",
            MeshData::new(quad(), shader).with_opacity(0.5),
        ));
        scene.add(Node::mesh("solid", MeshData::new(quad(), shader)));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        assert_eq!(
            blend_modes(renderer.device().commands()),
            vec![BlendMode::Opaque, BlendMode::Transparent]
        );
        assert_eq!(renderer.device().draw_count(), 2);
    }

    #[test]
    fn transparent_meshes_draw_far_to_near() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        for z in [5.0, 1.0, 9.0] {
            scene.add(
                Node::mesh("t", MeshData::new(quad(), shader).with_opacity(0.5))
                    .with_position(glam::Vec3::new(0.0, 0.0, z)),
            );
        }

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        assert_eq!(
            model_view_depths(renderer.device().commands()),
            vec![9.0, 5.0, 1.0]
        );
    }

    #[test]
    fn sorting_uses_world_depth_not_local() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        // group pushed to z = 10 holds a mesh at local z = -9, so its
        // world depth (1) is closer than the plain mesh at z = 5
        let group = scene.add(Node::group("g").with_position(glam::Vec3::new(0.0, 0.0, 10.0)));
        scene
            .add_to(
                group,
                Node::mesh("near", MeshData::new(quad(), shader).with_opacity(0.5))
                    .with_position(glam::Vec3::new(0.0, 0.0, -9.0)),
            )
            .unwrap();
        scene.add(
            Node::mesh("far", MeshData::new(quad(), shader).with_opacity(0.5))
                .with_position(glam::Vec3::new(0.0, 0.0, 5.0)),
        );

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        assert_eq!(
            model_view_depths(renderer.device().commands()),
            vec![5.0, 1.0]
        );
    }

    #[test]
    fn blend_mode_switches_only_on_change() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        scene.add(Node::mesh("a", MeshData::new(quad(), shader)));
        scene.add(Node::mesh("b", MeshData::new(quad(), shader)));
        scene.add(Node::mesh(
            "glow",
            MeshData::new(quad(), shader).with_blend_type(BlendType::Additive),
        ));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        assert_eq!(
            blend_modes(renderer.device().commands()),
            vec![BlendMode::Opaque, BlendMode::Additive]
        );
    }

    #[test]
    fn one_program_bind_and_projection_upload_per_shader() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        scene.add(Node::mesh("a", MeshData::new(quad(), shader)));
        scene.add(Node::mesh("b", MeshData::new(quad(), shader)));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        let commands = renderer.device().commands();
        let binds = commands
            .iter()
            .filter(|c| matches!(c, GpuCommand::BindProgram(_)))
            .count();
        let projections = commands
            .iter()
            .filter(|c| {
                matches!(c, GpuCommand::SetUniformMat4 { name, .. } if name == names::UNIFORM_PROJECTION)
            })
            .count();
        assert_eq!(binds, 1);
        assert_eq!(projections, 1);
    }

    #[test]
    fn six_point_lights_fill_exactly_four_slots() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        scene.add(Node::mesh("m", MeshData::new(quad(), shader)));
        for i in 0..6 {
            scene.add(
                Node::light("p", LightData::point(glam::Vec3::ONE, 1.0))
                    .with_position(glam::Vec3::new(i as f32, 0.0, 0.0)),
            );
        }

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        let lights: Vec<(usize, LightKind)> = renderer
            .device()
            .commands()
            .iter()
            .filter_map(|c| match c {
                GpuCommand::SetLight { slot, light } => Some((*slot, light.kind)),
                _ => None,
            })
            .collect();
        assert_eq!(lights.len(), MAX_LIGHTS);
        for (i, (slot, kind)) in lights.iter().enumerate() {
            assert_eq!(*slot, i);
            assert_eq!(*kind, LightKind::Point);
        }
    }

    #[test]
    fn ambient_lights_accumulate_without_taking_slots() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        scene.add(Node::mesh("m", MeshData::new(quad(), shader)));
        scene.add(Node::light(
            "a",
            LightData::ambient(glam::Vec3::new(1.0, 0.0, 0.0), 0.1),
        ));
        scene.add(Node::light(
            "b",
            LightData::ambient(glam::Vec3::new(0.0, 1.0, 0.0), 0.2),
        ));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        let mut ambient = None;
        let mut slot_kinds = Vec::new();
        for command in renderer.device().commands() {
            match command {
                GpuCommand::SetUniformVec3 { name, value } if name == names::UNIFORM_AMBIENT => {
                    ambient = Some(*value);
                }
                GpuCommand::SetLight { light, .. } => slot_kinds.push(light.kind),
                _ => {}
            }
        }
        let ambient = ambient.expect("no ambient uniform");
        assert!((ambient - glam::Vec3::new(0.1, 0.2, 0.0)).length() < 1e-6);
        assert_eq!(slot_kinds, vec![LightKind::None; MAX_LIGHTS]);
    }

    #[test]
    fn directional_light_direction_is_normalized_position_minus_target() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        scene.add(Node::mesh("m", MeshData::new(quad(), shader)));
        let sun = scene.add(Node::light(
            "sun",
            LightData::directional(glam::Vec3::ONE, 1.0),
        ));
        scene
            .node_mut(sun)
            .unwrap()
            .set_position(glam::Vec3::new(0.0, 4.0, 0.0));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        let slot0 = renderer
            .device()
            .commands()
            .iter()
            .find_map(|c| match c {
                GpuCommand::SetLight { slot: 0, light } => Some(*light),
                _ => None,
            })
            .expect("no light slot");
        assert_eq!(slot0.kind, LightKind::Directional);
        assert!((slot0.location - glam::Vec3::new(0.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn invisible_subtrees_are_not_drawn() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        let group = scene.add(Node::group("hidden"));
        scene
            .add_to(group, Node::mesh("m", MeshData::new(quad(), shader)))
            .unwrap();
        scene.node_mut(group).unwrap().visible = false;

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();
        assert_eq!(renderer.device().draw_count(), 0);
    }

    #[test]
    fn particles_draw_points_without_texture_or_normals() {
        let (mut scene, camera) = scene_with_camera();
        let mut shader = Shader::basic();
        shader.texture = Some(Texture::new(ImageData::white()));
        let shader = scene.add_shader(shader);
        let geometry = Geometry::new(vec![0.0; 9], Vec::new(), vec![1.0; 9], Vec::new(), Vec::new());
        scene.add(Node::mesh(
            "sparks",
            MeshData::new(geometry, shader).with_render_type(RenderType::Particles),
        ));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        let commands = renderer.device().commands();
        assert!(commands
            .iter()
            .any(|c| matches!(c, GpuCommand::DrawPoints { vertex_count: 3 })));
        assert!(!commands.iter().any(|c| matches!(
            c,
            GpuCommand::BindTexture { name, .. } if name == names::UNIFORM_TEXTURE
        )));
        assert!(!commands.iter().any(|c| matches!(
            c,
            GpuCommand::BindAttribute { name, .. }
                if name == names::ATTRIBUTE_NORMAL || name == names::ATTRIBUTE_UV
        )));
    }

    #[test]
    fn pending_texture_is_skipped_until_ready() {
        let (mut scene, camera) = scene_with_camera();
        let mut shader = Shader::basic();
        shader.texture = Some(Texture::pending("later"));
        let shader_id = scene.add_shader(shader);
        scene.add(Node::mesh("m", MeshData::new(quad(), shader_id)));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        let commands = renderer.device_mut().take_commands();
        assert!(!commands
            .iter()
            .any(|c| matches!(c, GpuCommand::CreateTexture { .. })));
        assert!(!commands
            .iter()
            .any(|c| matches!(c, GpuCommand::BindTexture { .. })));
        // the mesh itself still drew
        assert!(commands
            .iter()
            .any(|c| matches!(c, GpuCommand::DrawTriangles { .. })));

        // once the image arrives the next frame uploads and binds it
        scene
            .shader_mut(shader_id)
            .unwrap()
            .texture
            .as_mut()
            .unwrap()
            .set_image(ImageData::white());
        renderer.render(&mut scene, camera).unwrap();
        let commands = renderer.device().commands();
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, GpuCommand::CreateTexture { .. }))
                .count(),
            1
        );
        assert!(commands.iter().any(|c| matches!(
            c,
            GpuCommand::BindTexture { name, unit: 0, .. } if name == names::UNIFORM_TEXTURE
        )));
    }

    #[test]
    fn texture_uploads_once_across_frames() {
        let (mut scene, camera) = scene_with_camera();
        let mut shader = Shader::basic();
        shader.texture = Some(Texture::new(ImageData::white()));
        let shader = scene.add_shader(shader);
        scene.add(Node::mesh("m", MeshData::new(quad(), shader)));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();
        renderer.render(&mut scene, camera).unwrap();

        let commands = renderer.device().commands();
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, GpuCommand::CreateTexture { .. }))
                .count(),
            1
        );
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, GpuCommand::BindTexture { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn geometry_uploads_once_then_reuses_buffers() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        let mesh = scene.add(Node::mesh("m", MeshData::new(quad(), shader)));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();
        let first: Vec<GpuCommand> = renderer.device_mut().take_commands();
        let creates = first
            .iter()
            .filter(|c| matches!(c, GpuCommand::CreateBuffer { .. }))
            .count();
        // vertices, normals, colors, uvs, elements
        assert_eq!(creates, 5);

        renderer.render(&mut scene, camera).unwrap();
        let second = renderer.device_mut().take_commands();
        assert!(!second
            .iter()
            .any(|c| matches!(c, GpuCommand::CreateBuffer { .. })));
        assert!(!second
            .iter()
            .any(|c| matches!(c, GpuCommand::WriteBuffer { .. })));

        // same-size edit rewrites in place
        let node = scene.node_mut(mesh).unwrap();
        if let NodeKind::Mesh(data) = &mut node.kind {
            let mut vertices = data.geometry.vertices.clone();
            vertices[0] = 2.0;
            data.geometry.set_vertices(vertices);
        }
        renderer.render(&mut scene, camera).unwrap();
        let third = renderer.device_mut().take_commands();
        assert_eq!(
            third
                .iter()
                .filter(|c| matches!(c, GpuCommand::WriteBuffer { .. }))
                .count(),
            1
        );
        assert!(!third
            .iter()
            .any(|c| matches!(c, GpuCommand::CreateBuffer { .. })));

        // resizing reallocates
        let node = scene.node_mut(mesh).unwrap();
        if let NodeKind::Mesh(data) = &mut node.kind {
            data.geometry.set_vertices(vec![0.0; 18]);
        }
        renderer.render(&mut scene, camera).unwrap();
        let fourth = renderer.device_mut().take_commands();
        assert_eq!(
            fourth
                .iter()
                .filter(|c| matches!(c, GpuCommand::DestroyBuffer(_)))
                .count(),
            1
        );
        assert_eq!(
            fourth
                .iter()
                .filter(|c| matches!(c, GpuCommand::CreateBuffer { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn opacity_snaps_to_one_when_not_transparent() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        let mesh = scene.add(Node::mesh(
            "m",
            MeshData::new(quad(), shader).with_transparent(false),
        ));
        if let NodeKind::Mesh(data) = &mut scene.node_mut(mesh).unwrap().kind {
            data.opacity = 0.3;
        }

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        if let NodeKind::Mesh(data) = &scene.node(mesh).unwrap().kind {
            assert_eq!(data.opacity, 1.0);
        }
        let alpha = renderer
            .device()
            .commands()
            .iter()
            .find_map(|c| match c {
                GpuCommand::SetUniformF32 { name, value } if name == names::UNIFORM_ALPHA => {
                    Some(*value)
                }
                _ => None,
            })
            .expect("no alpha uniform");
        assert_eq!(alpha, 1.0);
    }

    #[test]
    fn depth_test_toggle_reaches_the_device() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::basic());
        scene.add(Node::mesh(
            "overlay",
            MeshData::new(quad(), shader).with_depth_test(false),
        ));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();
        assert!(renderer
            .device()
            .commands()
            .iter()
            .any(|c| matches!(c, GpuCommand::SetDepthTest(false))));
    }

    #[test]
    fn custom_uniforms_and_attributes_flow_through() {
        let (mut scene, camera) = scene_with_camera();
        let mut shader = Shader::basic();
        shader.set_custom_uniform("uWobble", UniformValue::Float(0.25));
        shader.set_custom_attribute("aSize", vec![1.0, 2.0, 3.0, 4.0]);
        let shader = scene.add_shader(shader);
        scene.add(Node::mesh("m", MeshData::new(quad(), shader)));

        let mut renderer = renderer();
        renderer.render(&mut scene, camera).unwrap();

        let commands = renderer.device_mut().take_commands();
        assert!(commands.iter().any(|c| matches!(
            c,
            GpuCommand::SetUniformF32 { name, value } if name == "uWobble" && *value == 0.25
        )));
        assert!(commands.iter().any(|c| matches!(
            c,
            GpuCommand::BindAttribute { name, components: 1, .. } if name == "aSize"
        )));

        // the attribute buffer is cached after the first frame
        renderer.render(&mut scene, camera).unwrap();
        let second = renderer.device().commands();
        assert!(!second
            .iter()
            .any(|c| matches!(c, GpuCommand::CreateBuffer { .. })));
        assert!(second.iter().any(|c| matches!(
            c,
            GpuCommand::BindAttribute { name, .. } if name == "aSize"
        )));
    }

    #[test]
    fn broken_shader_aborts_the_frame_with_compile_error() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::new("broken", "this is not wgsl".into()));
        scene.add(Node::mesh("m", MeshData::new(quad(), shader)));

        let mut renderer = renderer();
        let err = renderer.render(&mut scene, camera).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Gpu(GpuError::ShaderCompile(_))
        ));
    }

    #[test]
    fn failed_frame_is_discarded_not_presented() {
        let (mut scene, camera) = scene_with_camera();
        let shader = scene.add_shader(Shader::new("broken", "this is not wgsl".into()));
        scene.add(Node::mesh("m", MeshData::new(quad(), shader)));

        let mut renderer = renderer();
        assert!(renderer.render(&mut scene, camera).is_err());

        let commands = renderer.device().commands();
        assert_eq!(commands.last(), Some(&GpuCommand::AbortFrame));
        assert!(!commands.iter().any(|c| matches!(c, GpuCommand::EndFrame)));
    }

    #[test]
    fn rendering_through_a_non_camera_fails() {
        let mut scene = Scene::new();
        let group = scene.add(Node::group("g"));
        let mut renderer = renderer();
        assert!(matches!(
            renderer.render(&mut scene, group),
            Err(RenderError::NotACamera)
        ));
    }

    #[test]
    fn rendering_through_a_stale_id_fails() {
        let (mut scene, camera) = scene_with_camera();
        scene.remove(camera);
        let mut renderer = renderer();
        assert!(matches!(
            renderer.render(&mut scene, camera),
            Err(RenderError::Scene(SceneError::UnknownNode(_)))
        ));
    }
}
