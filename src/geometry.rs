//! Mesh geometry data: flat attribute arrays plus per-buffer upload flags.

/// Geometry for a mesh: positions, normals, colors and UVs as flat float
/// arrays, and a u16 triangle index list.
///
/// Each buffer carries its own needs-update flag. All flags start raised so
/// a fresh geometry uploads everything on first draw; the renderer clears a
/// flag once the matching GPU buffer has been written. Mutating an array in
/// place requires raising the flag again, which the `set_*` helpers do.
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Vertex positions, three floats per vertex.
    pub vertices: Vec<f32>,
    /// Vertex normals, three floats per vertex.
    pub normals: Vec<f32>,
    /// Vertex colors, three floats per vertex.
    pub colors: Vec<f32>,
    /// Texture coordinates, two floats per vertex.
    pub uvs: Vec<f32>,
    /// Triangle indices into the vertex arrays.
    pub indices: Vec<u16>,

    pub vertices_need_update: bool,
    pub normals_need_update: bool,
    pub colors_need_update: bool,
    pub uvs_need_update: bool,
    pub elements_need_update: bool,
}

impl Geometry {
    /// Creates a geometry with every upload flag raised.
    pub fn new(
        vertices: Vec<f32>,
        normals: Vec<f32>,
        colors: Vec<f32>,
        uvs: Vec<f32>,
        indices: Vec<u16>,
    ) -> Self {
        Self {
            vertices,
            normals,
            colors,
            uvs,
            indices,
            vertices_need_update: true,
            normals_need_update: true,
            colors_need_update: true,
            uvs_need_update: true,
            elements_need_update: true,
        }
    }

    /// Number of vertices described by the position array.
    pub fn vertex_count(&self) -> u32 {
        (self.vertices.len() / 3) as u32
    }

    /// Number of triangle indices.
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn set_vertices(&mut self, vertices: Vec<f32>) {
        self.vertices = vertices;
        self.vertices_need_update = true;
    }

    pub fn set_normals(&mut self, normals: Vec<f32>) {
        self.normals = normals;
        self.normals_need_update = true;
    }

    pub fn set_colors(&mut self, colors: Vec<f32>) {
        self.colors = colors;
        self.colors_need_update = true;
    }

    pub fn set_uvs(&mut self, uvs: Vec<f32>) {
        self.uvs = uvs;
        self.uvs_need_update = true;
    }

    pub fn set_indices(&mut self, indices: Vec<u16>) {
        self.indices = indices;
        self.elements_need_update = true;
    }

    /// Raw bytes of the position array for buffer upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn normal_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.normals)
    }

    pub fn color_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.colors)
    }

    pub fn uv_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.uvs)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}
