//! Spinning cubes demo
//!
//! Run with:
//!   cargo run --example cube
//!
//! Two lit cubes orbit their own axes: a checkerboard-textured opaque one
//! and an additively blended one. Escape exits.

use glam::Vec3;
use scene_engine::{
    gpu::{DeviceConfig, GpuError, WgpuDevice},
    scene::{BlendType, CameraData, LightData, MeshData, Node, NodeId, NodeKind, Scene},
    Geometry, ImageData, RenderError, Renderer, Shader, Texture, Window,
};
use std::time::Instant;
use winit::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() {
    env_logger::init();

    println!("Scene Engine demo: spinning cubes");
    println!("  Escape - Exit");

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let mut window = match Window::new(&event_loop, "Scene Engine - Spinning Cubes", WIDTH, HEIGHT)
    {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Failed to create window: {e}");
            return;
        }
    };

    let device = match WgpuDevice::new(
        window.window_arc(),
        DeviceConfig {
            width: WIDTH,
            height: HEIGHT,
            vsync: true,
        },
    ) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to create GPU device: {e}");
            return;
        }
    };
    let mut renderer = Renderer::new(device);

    let (mut scene, camera, solid_cube, glow_cube) = setup_scene();
    let start = Instant::now();

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    window.handle_event(&event);
                    if window.should_close() {
                        elwt.exit();
                    }

                    match event {
                        WindowEvent::KeyboardInput { event, .. } => {
                            if let PhysicalKey::Code(KeyCode::Escape) = event.physical_key {
                                elwt.exit();
                            }
                        }
                        WindowEvent::RedrawRequested => {
                            let t = start.elapsed().as_secs_f32();
                            if let Some(node) = scene.node_mut(solid_cube) {
                                node.set_rotation(Vec3::new(t * 0.7, t, 0.0));
                            }
                            if let Some(node) = scene.node_mut(glow_cube) {
                                node.set_rotation(Vec3::new(-t, t * 0.5, t * 0.3));
                            }

                            match renderer.render(&mut scene, camera) {
                                Ok(()) => {}
                                Err(RenderError::Gpu(GpuError::SurfaceLost)) => {
                                    let (w, h) = window.dimensions();
                                    renderer.resize(w, h);
                                }
                                Err(e) => eprintln!("Render error: {e}"),
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => {
                    if window.was_resized() {
                        let (w, h) = window.dimensions();
                        renderer.resize(w, h);
                        if let Some(node) = scene.node_mut(camera) {
                            if let NodeKind::Camera(cam) = &mut node.kind {
                                cam.set_aspect(window.aspect_ratio());
                            }
                        }
                        window.clear_resize_flag();
                    }
                    window.request_redraw();
                }
                _ => {}
            }
        })
        .expect("Event loop failed");
}

/// Camera, three lights and the two cubes.
fn setup_scene() -> (Scene, NodeId, NodeId, NodeId) {
    let mut scene = Scene::new();

    let checker = ImageData::checkerboard(64, [235, 235, 235, 255], [45, 70, 130, 255]);
    let textured = scene.add_shader(Shader::basic().with_texture(Texture::new(checker)));
    let plain = scene.add_shader(Shader::basic());

    let camera = scene.add(
        Node::camera(CameraData::new(
            45.0,
            WIDTH as f32 / HEIGHT as f32,
            0.1,
            1000.0,
        ))
        .with_position(Vec3::new(0.0, 2.0, 8.0)),
    );

    scene.add(Node::light(
        "ambient",
        LightData::ambient(Vec3::new(1.0, 1.0, 1.0), 0.15),
    ));
    scene.add(
        Node::light(
            "sun",
            LightData::directional(Vec3::new(1.0, 0.95, 0.85), 0.8),
        )
        .with_position(Vec3::new(3.0, 5.0, 2.0)),
    );
    scene.add(
        Node::light(
            "lamp",
            LightData::point(Vec3::new(0.4, 0.6, 1.0), 1.2).with_fall_off(30.0),
        )
        .with_position(Vec3::new(-4.0, 2.0, 4.0)),
    );

    let solid_cube = scene.add(
        Node::mesh("solid cube", MeshData::new(cube_geometry(), textured))
            .with_position(Vec3::new(-1.8, 0.0, 0.0)),
    );

    let mut glow_geometry = cube_geometry();
    glow_geometry.set_colors(face_palette());
    let glow_cube = scene.add(
        Node::mesh(
            "glow cube",
            MeshData::new(glow_geometry, plain)
                .with_blend_type(BlendType::Additive)
                .with_opacity(0.6),
        )
        .with_position(Vec3::new(1.8, 0.0, 0.0)),
    );

    (scene, camera, solid_cube, glow_cube)
}

/// A unit cube with four vertices per face so normals and UVs stay flat.
fn cube_geometry() -> Geometry {
    #[rustfmt::skip]
    let vertices = vec![
        // +Z
        -1.0, -1.0,  1.0,   1.0, -1.0,  1.0,   1.0,  1.0,  1.0,  -1.0,  1.0,  1.0,
        // -Z
        -1.0, -1.0, -1.0,  -1.0,  1.0, -1.0,   1.0,  1.0, -1.0,   1.0, -1.0, -1.0,
        // +Y
        -1.0,  1.0, -1.0,  -1.0,  1.0,  1.0,   1.0,  1.0,  1.0,   1.0,  1.0, -1.0,
        // -Y
        -1.0, -1.0, -1.0,   1.0, -1.0, -1.0,   1.0, -1.0,  1.0,  -1.0, -1.0,  1.0,
        // +X
         1.0, -1.0, -1.0,   1.0,  1.0, -1.0,   1.0,  1.0,  1.0,   1.0, -1.0,  1.0,
        // -X
        -1.0, -1.0, -1.0,  -1.0, -1.0,  1.0,  -1.0,  1.0,  1.0,  -1.0,  1.0, -1.0,
    ];

    let face_normals = [
        [0.0, 0.0, 1.0],
        [0.0, 0.0, -1.0],
        [0.0, 1.0, 0.0],
        [0.0, -1.0, 0.0],
        [1.0, 0.0, 0.0],
        [-1.0, 0.0, 0.0],
    ];
    let mut normals = Vec::with_capacity(24 * 3);
    for normal in face_normals {
        for _ in 0..4 {
            normals.extend_from_slice(&normal);
        }
    }

    let mut uvs = Vec::with_capacity(24 * 2);
    for _ in 0..6 {
        uvs.extend_from_slice(&[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0]);
    }

    let mut indices = Vec::with_capacity(36);
    for face in 0..6u16 {
        let o = face * 4;
        indices.extend_from_slice(&[o, o + 1, o + 2, o, o + 2, o + 3]);
    }

    Geometry::new(vertices, normals, vec![1.0; 24 * 3], uvs, indices)
}

/// One color per cube face, repeated for its four vertices.
fn face_palette() -> Vec<f32> {
    let faces = [
        [1.0, 0.35, 0.2],
        [0.2, 1.0, 0.4],
        [0.25, 0.45, 1.0],
        [1.0, 0.9, 0.25],
        [1.0, 0.4, 0.9],
        [0.3, 0.9, 1.0],
    ];
    let mut colors = Vec::with_capacity(24 * 3);
    for face in faces {
        for _ in 0..4 {
            colors.extend_from_slice(&face);
        }
    }
    colors
}
