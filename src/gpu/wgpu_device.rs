//! The real GPU device over wgpu.
//!
//! The device buffers draw operations during the frame and encodes them
//! into a single render pass at `end_frame`, so the GL-flavored protocol
//! (sticky state, named uniforms) maps cleanly onto wgpu pipelines and
//! bind groups. Per program it lazily builds one pipeline per
//! (blend, depth, topology) combination; the staged uniform names land in
//! one [`UniformBlock`] written per draw from a growable buffer pool.

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::device::{
    validate_wgsl, BufferHandle, GpuDevice, GpuError, GpuResult, ProgramDescriptor, ProgramHandle,
    TextureHandle,
};
use super::types::{BlendMode, BufferKind, BufferUsageHint, LightSlot, UniformBlock, MAX_LIGHTS};
use crate::shader::names;
use crate::texture::ImageData;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Surface configuration for a new device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
        }
    }
}

/// Pipeline variant selector within one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    blend: BlendMode,
    depth: bool,
    points: bool,
}

struct Program {
    label: String,
    module: wgpu::ShaderModule,
    custom_attributes: Vec<String>,
    /// Module declares `vs_points`/`fs_points` entry points for point
    /// topology.
    has_points_entries: bool,
    /// Custom uniform name -> slot in `UniformBlock::custom`.
    custom_slots: HashMap<String, usize>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

enum DrawKind {
    Triangles(u32),
    Points(u32),
}

/// A fully staged draw, captured when the renderer issues a draw call.
struct DrawOp {
    program: ProgramHandle,
    key: PipelineKey,
    uniforms: UniformBlock,
    attributes: Vec<(String, BufferHandle)>,
    index_buffer: Option<BufferHandle>,
    texture: Option<TextureHandle>,
    environment: Option<TextureHandle>,
    kind: DrawKind,
}

/// Sticky protocol state between draws.
struct StagedState {
    program: Option<ProgramHandle>,
    blend: BlendMode,
    depth: bool,
    uniforms: UniformBlock,
    attributes: Vec<(String, BufferHandle)>,
    index_buffer: Option<BufferHandle>,
    texture: Option<TextureHandle>,
    environment: Option<TextureHandle>,
}

impl Default for StagedState {
    fn default() -> Self {
        Self {
            program: None,
            blend: BlendMode::Opaque,
            depth: true,
            uniforms: UniformBlock::default(),
            attributes: Vec::new(),
            index_buffer: None,
            texture: None,
            environment: None,
        }
    }
}

impl StagedState {
    /// Textures are shader properties, so switching programs drops the
    /// previous shader's bindings back to the device defaults. Without
    /// this an untextured mesh drawn after a textured one would sample
    /// the stale diffuse texture.
    fn bind_program(&mut self, program: ProgramHandle) {
        self.program = Some(program);
        self.texture = None;
        self.environment = None;
    }
}

struct StoredTexture {
    view: wgpu::TextureView,
    cube: bool,
}

pub struct WgpuDevice {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,

    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    environment_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,

    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, StoredTexture>,
    programs: HashMap<u64, Program>,
    next_buffer_id: u64,
    next_texture_id: u64,
    next_program_id: u64,

    texture_groups: HashMap<u64, wgpu::BindGroup>,
    environment_groups: HashMap<u64, wgpu::BindGroup>,
    default_texture_group: wgpu::BindGroup,
    default_environment_group: wgpu::BindGroup,

    /// One (buffer, bind group) per draw, reused across frames.
    uniform_pool: Vec<(wgpu::Buffer, wgpu::BindGroup)>,

    current_frame: Option<wgpu::SurfaceTexture>,
    clear: Option<[f32; 4]>,
    draws: Vec<DrawOp>,
    staged: StagedState,
}

impl WgpuDevice {
    /// Creates a device rendering to the given window. Failures are logged
    /// and returned; the caller must not retry on the same window state.
    pub fn new(window: Arc<winit::window::Window>, config: DeviceConfig) -> GpuResult<Self> {
        pollster::block_on(Self::new_async(window, config)).map_err(|e| {
            log::error!("GPU context creation failed: {e}");
            e
        })
    }

    async fn new_async(
        window: Arc<winit::window::Window>,
        config: DeviceConfig,
    ) -> GpuResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| GpuError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::AdapterNotFound)?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Scene Engine Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| GpuError::DeviceCreationFailed(e.to_string()))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let max_size = device.limits().max_texture_dimension_2d;
        let width = config.width.clamp(1, max_size);
        let height = config.height.clamp(1, max_size);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: if config.vsync {
                wgpu::PresentMode::Fifo
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let depth_view = Self::create_depth_view(&device, width, height);

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform block layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let environment_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("environment layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::Cube,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scene pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout, &environment_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("default sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let white = [255u8, 255, 255, 255];
        let default_texture_view =
            Self::upload_texture_2d(&device, &queue, 1, 1, &white, "default texture");
        let default_texture_group = Self::texture_group(
            &device,
            &texture_layout,
            &default_texture_view,
            &sampler,
            "default texture group",
        );

        let black = [0u8, 0, 0, 255];
        let default_environment_view = Self::upload_texture_cube(
            &device,
            &queue,
            1,
            &[&black, &black, &black, &black, &black, &black],
            "default environment",
        );
        let default_environment_group = Self::texture_group(
            &device,
            &environment_layout,
            &default_environment_view,
            &sampler,
            "default environment group",
        );

        Ok(Self {
            surface,
            device,
            queue,
            surface_config,
            depth_view,
            uniform_layout,
            texture_layout,
            environment_layout,
            pipeline_layout,
            sampler,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_program_id: 1,
            texture_groups: HashMap::new(),
            environment_groups: HashMap::new(),
            default_texture_group,
            default_environment_group,
            uniform_pool: Vec::new(),
            current_frame: None,
            clear: None,
            draws: Vec::new(),
            staged: StagedState::default(),
        })
    }

    fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth buffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    fn upload_texture_2d(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
        rgba: &[u8],
        label: &str,
    ) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    fn upload_texture_cube(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        size: u32,
        faces: &[&[u8]; 6],
        label: &str,
    ) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        for (i, face) in faces.iter().enumerate() {
            queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: i as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                face,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(size * 4),
                    rows_per_image: Some(size),
                },
                wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
            );
        }
        texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        })
    }

    fn texture_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
        label: &str,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }

    fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
        match mode {
            BlendMode::Opaque => None,
            BlendMode::Transparent => Some(wgpu::BlendState::ALPHA_BLENDING),
            BlendMode::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
        }
    }

    /// Attribute order of the vertex-buffer slots for a pipeline variant.
    /// Point pipelines carry position and color only; triangle pipelines
    /// use the full standard set. Custom attributes follow either way.
    fn attribute_order(program: &Program, points: bool) -> Vec<(String, u32, u32)> {
        // (name, components, shader location)
        let mut order: Vec<(String, u32, u32)> = if points {
            vec![
                (names::ATTRIBUTE_POSITION.to_string(), 3, 0),
                (names::ATTRIBUTE_COLOR.to_string(), 3, 2),
            ]
        } else {
            vec![
                (names::ATTRIBUTE_POSITION.to_string(), 3, 0),
                (names::ATTRIBUTE_NORMAL.to_string(), 3, 1),
                (names::ATTRIBUTE_COLOR.to_string(), 3, 2),
                (names::ATTRIBUTE_UV.to_string(), 2, 3),
            ]
        };
        for (i, name) in program.custom_attributes.iter().enumerate() {
            order.push((name.clone(), 1, 4 + i as u32));
        }
        order
    }

    fn ensure_pipeline(&mut self, program_id: u64, key: PipelineKey) {
        let Some(program) = self.programs.get(&program_id) else {
            return;
        };
        if program.pipelines.contains_key(&key) {
            return;
        }
        if key.points && !program.has_points_entries {
            return;
        }

        let order = Self::attribute_order(program, key.points);
        let attributes: Vec<[wgpu::VertexAttribute; 1]> = order
            .iter()
            .map(|(_, components, location)| {
                [wgpu::VertexAttribute {
                    format: match components {
                        1 => wgpu::VertexFormat::Float32,
                        2 => wgpu::VertexFormat::Float32x2,
                        _ => wgpu::VertexFormat::Float32x3,
                    },
                    offset: 0,
                    shader_location: *location,
                }]
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = order
            .iter()
            .zip(attributes.iter())
            .map(|((_, components, _), attrs)| wgpu::VertexBufferLayout {
                array_stride: (*components as u64) * 4,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attrs,
            })
            .collect();

        let (vs_entry, fs_entry) = if key.points {
            ("vs_points", "fs_points")
        } else {
            ("vs_main", "fs_main")
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&format!("{} pipeline", program.label)),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: vs_entry,
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: fs_entry,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.surface_config.format,
                        blend: Self::blend_state(key.blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: if key.points {
                        wgpu::PrimitiveTopology::PointList
                    } else {
                        wgpu::PrimitiveTopology::TriangleList
                    },
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: if key.points {
                        None
                    } else {
                        Some(wgpu::Face::Back)
                    },
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: key.depth,
                    depth_compare: if key.depth {
                        wgpu::CompareFunction::LessEqual
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        if let Some(program) = self.programs.get_mut(&program_id) {
            program.pipelines.insert(key, pipeline);
        }
    }

    fn ensure_uniform_slot(&mut self, index: usize) {
        while self.uniform_pool.len() <= index {
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("uniform block"),
                size: std::mem::size_of::<UniformBlock>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("uniform block group"),
                layout: &self.uniform_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });
            self.uniform_pool.push((buffer, group));
        }
    }

    fn ensure_texture_group(&mut self, texture: TextureHandle, cube: bool) {
        let groups = if cube {
            &self.environment_groups
        } else {
            &self.texture_groups
        };
        if groups.contains_key(&texture.0) {
            return;
        }
        let Some(stored) = self.textures.get(&texture.0) else {
            return;
        };
        if stored.cube != cube {
            return;
        }
        let layout = if cube {
            &self.environment_layout
        } else {
            &self.texture_layout
        };
        let group = Self::texture_group(&self.device, layout, &stored.view, &self.sampler, "texture group");
        if cube {
            self.environment_groups.insert(texture.0, group);
        } else {
            self.texture_groups.insert(texture.0, group);
        }
    }

    fn record_draw(&mut self, kind: DrawKind) {
        let Some(program) = self.staged.program else {
            log::warn!("draw issued with no program bound, skipping");
            return;
        };
        let points = matches!(kind, DrawKind::Points(_));
        self.draws.push(DrawOp {
            program,
            key: PipelineKey {
                blend: self.staged.blend,
                depth: self.staged.depth,
                points,
            },
            uniforms: self.staged.uniforms,
            attributes: self.staged.attributes.clone(),
            index_buffer: self.staged.index_buffer,
            texture: self.staged.texture,
            environment: self.staged.environment,
            kind,
        });
    }

    fn stage_attribute(&mut self, name: &str, buffer: BufferHandle) {
        if let Some(entry) = self.staged.attributes.iter_mut().find(|(n, _)| n == name) {
            entry.1 = buffer;
        } else {
            self.staged.attributes.push((name.to_string(), buffer));
        }
    }
}

impl GpuDevice for WgpuDevice {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let max_size = self.device.limits().max_texture_dimension_2d;
        self.surface_config.width = width.min(max_size);
        self.surface_config.height = height.min(max_size);
        self.surface.configure(&self.device, &self.surface_config);
        self.depth_view = Self::create_depth_view(
            &self.device,
            self.surface_config.width,
            self.surface_config.height,
        );
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn begin_frame(&mut self, clear: Option<[f32; 4]>) -> GpuResult<()> {
        let frame = self.surface.get_current_texture().map_err(|e| match e {
            wgpu::SurfaceError::Lost => GpuError::SurfaceLost,
            wgpu::SurfaceError::OutOfMemory => GpuError::OutOfMemory,
            other => GpuError::FrameAcquireFailed(other.to_string()),
        })?;
        self.current_frame = Some(frame);
        self.clear = clear;
        self.draws.clear();
        Ok(())
    }

    fn abort_frame(&mut self) {
        // Dropping the surface texture returns it to the swapchain.
        self.current_frame = None;
        self.clear = None;
        self.draws.clear();
    }

    fn end_frame(&mut self) -> GpuResult<()> {
        let Some(frame) = self.current_frame.take() else {
            return Ok(());
        };

        // Resources first: pipelines, uniform slots, bind groups. These
        // touch &mut self and must precede the pass encoding borrows.
        let keys: Vec<(u64, PipelineKey)> =
            self.draws.iter().map(|op| (op.program.0, op.key)).collect();
        for (program, key) in keys {
            self.ensure_pipeline(program, key);
        }
        let draw_count = self.draws.len();
        if draw_count > 0 {
            self.ensure_uniform_slot(draw_count - 1);
        }
        for i in 0..draw_count {
            self.queue.write_buffer(
                &self.uniform_pool[i].0,
                0,
                bytemuck::bytes_of(&self.draws[i].uniforms),
            );
        }
        let texture_refs: Vec<(Option<TextureHandle>, Option<TextureHandle>)> = self
            .draws
            .iter()
            .map(|op| (op.texture, op.environment))
            .collect();
        for (texture, environment) in texture_refs {
            if let Some(t) = texture {
                self.ensure_texture_group(t, false);
            }
            if let Some(e) = environment {
                self.ensure_texture_group(e, true);
            }
        }

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });

        {
            let color_load = match self.clear {
                Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: c[0] as f64,
                    g: c[1] as f64,
                    b: c[2] as f64,
                    a: c[3] as f64,
                }),
                None => wgpu::LoadOp::Load,
            };
            let depth_load = match self.clear {
                Some(_) => wgpu::LoadOp::Clear(1.0),
                None => wgpu::LoadOp::Load,
            };

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scene pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let mut bound: Option<(u64, PipelineKey)> = None;
            for (i, op) in self.draws.iter().enumerate() {
                let Some(program) = self.programs.get(&op.program.0) else {
                    continue;
                };
                if op.key.points && !program.has_points_entries {
                    log::warn!(
                        "program {} has no point entry points, skipping point draw",
                        program.label
                    );
                    continue;
                }
                let Some(pipeline) = program.pipelines.get(&op.key) else {
                    continue;
                };

                if bound != Some((op.program.0, op.key)) {
                    pass.set_pipeline(pipeline);
                    bound = Some((op.program.0, op.key));
                }

                pass.set_bind_group(0, &self.uniform_pool[i].1, &[]);
                let texture_group = op
                    .texture
                    .and_then(|t| self.texture_groups.get(&t.0))
                    .unwrap_or(&self.default_texture_group);
                pass.set_bind_group(1, texture_group, &[]);
                let environment_group = op
                    .environment
                    .and_then(|e| self.environment_groups.get(&e.0))
                    .unwrap_or(&self.default_environment_group);
                pass.set_bind_group(2, environment_group, &[]);

                let order = Self::attribute_order(program, op.key.points);
                for (slot, (name, _, _)) in order.iter().enumerate() {
                    let Some((_, handle)) = op.attributes.iter().find(|(n, _)| n == name) else {
                        continue;
                    };
                    if let Some(buffer) = self.buffers.get(&handle.0) {
                        pass.set_vertex_buffer(slot as u32, buffer.slice(..));
                    }
                }

                match op.kind {
                    DrawKind::Triangles(index_count) => {
                        let Some(index) = op.index_buffer.and_then(|h| self.buffers.get(&h.0))
                        else {
                            continue;
                        };
                        pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint16);
                        pass.draw_indexed(0..index_count, 0, 0..1);
                    }
                    DrawKind::Points(vertex_count) => {
                        pass.draw(0..vertex_count, 0..1);
                    }
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        self.draws.clear();
        Ok(())
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> GpuResult<ProgramHandle> {
        let module_ir = validate_wgsl(&desc.label, &desc.source)?;
        let has_points_entries = module_ir
            .entry_points
            .iter()
            .any(|e| e.name == "vs_points")
            && module_ir.entry_points.iter().any(|e| e.name == "fs_points");

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });

        let custom_slots = desc
            .custom_uniforms
            .iter()
            .take(16)
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let id = self.next_program_id;
        self.next_program_id += 1;
        self.programs.insert(
            id,
            Program {
                label: desc.label.clone(),
                module,
                custom_attributes: desc.custom_attributes.clone(),
                has_points_entries,
                custom_slots,
                pipelines: HashMap::new(),
            },
        );
        Ok(ProgramHandle(id))
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        self.staged.bind_program(program);
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.staged.blend = mode;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.staged.depth = enabled;
    }

    fn set_uniform_mat4(&mut self, name: &str, value: &glam::Mat4) {
        let cols = value.to_cols_array_2d();
        match name {
            names::UNIFORM_PROJECTION => self.staged.uniforms.projection = cols,
            names::UNIFORM_MODEL_VIEW => self.staged.uniforms.model_view = cols,
            _ => {}
        }
    }

    fn set_uniform_mat3(&mut self, name: &str, value: &glam::Mat3) {
        if name != names::UNIFORM_NORMAL_MATRIX {
            return;
        }
        let mut m = glam::Mat4::IDENTITY.to_cols_array_2d();
        for (col, axis) in [value.x_axis, value.y_axis, value.z_axis].iter().enumerate() {
            m[col][0] = axis.x;
            m[col][1] = axis.y;
            m[col][2] = axis.z;
        }
        self.staged.uniforms.normal_matrix = m;
    }

    fn set_uniform_vec3(&mut self, name: &str, value: glam::Vec3) {
        let packed = [value.x, value.y, value.z, 0.0];
        match name {
            names::UNIFORM_AMBIENT => self.staged.uniforms.ambient = packed,
            names::UNIFORM_EYE_POSITION => self.staged.uniforms.eye_position = packed,
            names::UNIFORM_EYE_DIRECTION => self.staged.uniforms.eye_direction = packed,
            _ => {}
        }
    }

    fn set_uniform_f32(&mut self, name: &str, value: f32) {
        if name == names::UNIFORM_ALPHA {
            self.staged.uniforms.alpha[0] = value;
            return;
        }
        // Custom float uniform of the bound program, if declared.
        let Some(program) = self.staged.program.and_then(|p| self.programs.get(&p.0)) else {
            return;
        };
        if let Some(&slot) = program.custom_slots.get(name) {
            self.staged.uniforms.custom[slot / 4][slot % 4] = value;
        }
    }

    fn set_light(&mut self, slot: usize, light: LightSlot) {
        if slot >= MAX_LIGHTS {
            return;
        }
        self.staged.uniforms.lights[slot] = light.into();
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        _usage: BufferUsageHint,
        data: &[u8],
    ) -> GpuResult<BufferHandle> {
        // COPY_DST regardless of the hint: static geometry can still be
        // edited, the hint only describes the expected frequency.
        let flags = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST;
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: data,
                usage: flags,
            });
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        if let Some(b) = self.buffers.get(&buffer.0) {
            self.queue.write_buffer(b, 0, data);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn bind_attribute(&mut self, name: &str, buffer: BufferHandle, _components: u32) {
        self.stage_attribute(name, buffer);
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle) {
        self.staged.index_buffer = Some(buffer);
    }

    fn create_texture(&mut self, image: &ImageData) -> GpuResult<TextureHandle> {
        let view = Self::upload_texture_2d(
            &self.device,
            &self.queue,
            image.width,
            image.height,
            &image.data,
            &image.name,
        );
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, StoredTexture { view, cube: false });
        Ok(TextureHandle(id))
    }

    fn create_environment(&mut self, faces: &[ImageData; 6]) -> GpuResult<TextureHandle> {
        let size = faces[0].width;
        let data: [&[u8]; 6] = [
            &faces[0].data,
            &faces[1].data,
            &faces[2].data,
            &faces[3].data,
            &faces[4].data,
            &faces[5].data,
        ];
        let view = Self::upload_texture_cube(&self.device, &self.queue, size, &data, "environment");
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, StoredTexture { view, cube: true });
        Ok(TextureHandle(id))
    }

    fn bind_texture(&mut self, name: &str, _unit: u32, texture: TextureHandle) {
        match name {
            names::UNIFORM_TEXTURE => self.staged.texture = Some(texture),
            names::UNIFORM_ENVIRONMENT => self.staged.environment = Some(texture),
            _ => {}
        }
    }

    fn draw_triangles(&mut self, index_count: u32) {
        self.record_draw(DrawKind::Triangles(index_count));
    }

    fn draw_points(&mut self, vertex_count: u32) {
        self.record_draw(DrawKind::Points(vertex_count));
    }
}
