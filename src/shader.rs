//! Shader assets: sources, texture slots and custom uniform/attribute maps.

use std::collections::BTreeMap;

use crate::gpu::{BufferHandle, ProgramDescriptor, ProgramHandle};
use crate::texture::{EnvironmentMap, Texture};

/// The fixed attribute and uniform name table shared between the renderer
/// and the devices.
pub mod names {
    pub const ATTRIBUTE_POSITION: &str = "aVertPosition";
    pub const ATTRIBUTE_NORMAL: &str = "aVertNormal";
    pub const ATTRIBUTE_COLOR: &str = "aVertColor";
    pub const ATTRIBUTE_UV: &str = "aVertUV";

    pub const UNIFORM_MODEL_VIEW: &str = "uModelViewMatrix";
    pub const UNIFORM_PROJECTION: &str = "uProjectionMatrix";
    pub const UNIFORM_NORMAL_MATRIX: &str = "uNormalMatrix";
    pub const UNIFORM_AMBIENT: &str = "uAmbientLightColor";
    pub const UNIFORM_EYE_DIRECTION: &str = "uEyeDirection";
    pub const UNIFORM_EYE_POSITION: &str = "uEyePosition";
    pub const UNIFORM_TEXTURE: &str = "uTexture";
    pub const UNIFORM_ENVIRONMENT: &str = "uEnvironment";
    pub const UNIFORM_ALPHA: &str = "uAlpha";
}

/// Identifies a shader in the scene's asset table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub(crate) usize);

/// Value of a custom uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
}

/// A per-vertex custom attribute: one float per vertex, uploaded lazily
/// and shared by every mesh drawn with the owning shader.
#[derive(Debug, Clone)]
pub struct CustomAttribute {
    pub values: Vec<f32>,
    pub needs_update: bool,
    pub(crate) buffer: Option<BufferHandle>,
    pub(crate) uploaded_len: usize,
}

impl CustomAttribute {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            needs_update: true,
            buffer: None,
            uploaded_len: 0,
        }
    }
}

/// A shader program description plus its resource slots.
///
/// The WGSL source must expose `vs_main`/`fs_main`, and `vs_points`/
/// `fs_points` if meshes with the particle render type use it. Programs
/// compile lazily on first draw; the cached handle makes re-initialization
/// a no-op.
#[derive(Debug)]
pub struct Shader {
    pub name: String,
    pub source: String,
    pub texture: Option<Texture>,
    pub environment: Option<EnvironmentMap>,
    custom_uniforms: BTreeMap<String, UniformValue>,
    custom_attributes: BTreeMap<String, CustomAttribute>,
    pub(crate) program: Option<ProgramHandle>,
}

impl Shader {
    pub fn new(name: &str, source: String) -> Self {
        Self {
            name: name.to_string(),
            source,
            texture: None,
            environment: None,
            custom_uniforms: BTreeMap::new(),
            custom_attributes: BTreeMap::new(),
            program: None,
        }
    }

    /// The built-in lit shader covering the standard name table.
    pub fn basic() -> Self {
        Self::new("basic", BASIC_SOURCE.to_string())
    }

    pub fn with_texture(mut self, texture: Texture) -> Self {
        self.texture = Some(texture);
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentMap) -> Self {
        self.environment = Some(environment);
        self
    }

    /// True once the program has been compiled and cached.
    pub fn is_initialized(&self) -> bool {
        self.program.is_some()
    }

    /// Declares or overwrites a custom uniform.
    pub fn set_custom_uniform(&mut self, name: &str, value: UniformValue) {
        self.custom_uniforms.insert(name.to_string(), value);
    }

    pub fn custom_uniforms(&self) -> impl Iterator<Item = (&str, UniformValue)> {
        self.custom_uniforms.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Declares a custom per-vertex attribute. Declaring after the program
    /// has compiled has no effect on the vertex layout; declare up front.
    pub fn set_custom_attribute(&mut self, name: &str, values: Vec<f32>) {
        match self.custom_attributes.get_mut(name) {
            Some(attr) => {
                attr.values = values;
                attr.needs_update = true;
            }
            None => {
                self.custom_attributes
                    .insert(name.to_string(), CustomAttribute::new(values));
            }
        }
    }

    pub fn custom_attribute_mut(&mut self, name: &str) -> Option<&mut CustomAttribute> {
        self.custom_attributes.get_mut(name)
    }

    pub(crate) fn custom_attributes_mut(
        &mut self,
    ) -> impl Iterator<Item = (&str, &mut CustomAttribute)> {
        self.custom_attributes
            .iter_mut()
            .map(|(k, v)| (k.as_str(), v))
    }

    /// The descriptor a device compiles this shader from. Custom names are
    /// listed in sorted order, which fixes their slot assignment.
    pub(crate) fn descriptor(&self) -> ProgramDescriptor {
        ProgramDescriptor {
            label: self.name.clone(),
            source: self.source.clone(),
            custom_uniforms: self.custom_uniforms.keys().cloned().collect(),
            custom_attributes: self.custom_attributes.keys().cloned().collect(),
        }
    }
}

/// WGSL for the built-in shader: textured, vertex-colored, lit by the
/// fixed four-slot light array plus the ambient term. Light kind codes in
/// `color.w`: 2 = directional, 4 = point; `position.w` is the point-light
/// fall-off distance.
const BASIC_SOURCE: &str = r#"
struct Light {
    position: vec4<f32>,
    color: vec4<f32>,
};

struct Uniforms {
    projection: mat4x4<f32>,
    model_view: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    ambient: vec4<f32>,
    eye_position: vec4<f32>,
    eye_direction: vec4<f32>,
    lights: array<Light, 4>,
    alpha: vec4<f32>,
    custom: array<vec4<f32>, 4>,
};

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(1) @binding(0) var t_diffuse: texture_2d<f32>;
@group(1) @binding(1) var s_diffuse: sampler;
@group(2) @binding(0) var t_environment: texture_cube<f32>;
@group(2) @binding(1) var s_environment: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) color: vec3<f32>,
    @location(3) uv: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) color: vec3<f32>,
    @location(3) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world = uniforms.model_view * vec4<f32>(in.position, 1.0);
    out.clip_position = uniforms.projection * world;
    out.world_position = world.xyz;
    out.normal = (uniforms.normal_matrix * vec4<f32>(in.normal, 0.0)).xyz;
    out.color = in.color;
    out.uv = in.uv;
    return out;
}

fn apply_lights(world_position: vec3<f32>, normal: vec3<f32>) -> vec3<f32> {
    var lit = uniforms.ambient.rgb;
    let n = normalize(normal);
    for (var i = 0; i < 4; i = i + 1) {
        let light = uniforms.lights[i];
        let kind = i32(light.color.w);
        if (kind == 2) {
            lit = lit + light.color.rgb * max(dot(n, normalize(light.position.xyz)), 0.0);
        } else if (kind == 4) {
            let to_light = light.position.xyz - world_position;
            let fall_off = max(1.0 - length(to_light) / light.position.w, 0.0);
            lit = lit + light.color.rgb * max(dot(n, normalize(to_light)), 0.0) * fall_off;
        }
    }
    return lit;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = textureSample(t_diffuse, s_diffuse, in.uv);
    let lit = apply_lights(in.world_position, in.normal);
    return vec4<f32>(in.color * texel.rgb * lit, uniforms.alpha.x * texel.a);
}

struct PointInput {
    @location(0) position: vec3<f32>,
    @location(2) color: vec3<f32>,
};

struct PointOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec3<f32>,
};

@vertex
fn vs_points(in: PointInput) -> PointOutput {
    var out: PointOutput;
    out.clip_position = uniforms.projection * uniforms.model_view * vec4<f32>(in.position, 1.0);
    out.color = in.color;
    return out;
}

@fragment
fn fs_points(in: PointOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(in.color, uniforms.alpha.x);
}
"#;
