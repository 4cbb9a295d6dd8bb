//! Texture and environment-map resources.

use std::path::Path;

use image::GenericImageView;
use thiserror::Error;

use crate::gpu::TextureHandle;

/// Errors from decoding image data.
#[derive(Debug, Error)]
pub enum TextureError {
    #[error("failed to load image: {0}")]
    Load(String),
}

/// CPU-side image data, always RGBA8.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub name: String,
}

impl ImageData {
    /// Load and decode an image file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|e| TextureError::Load(e.to_string()))?;
        Ok(Self::from_image(img, &name))
    }

    /// Decode an image from an in-memory encoded byte slice.
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, TextureError> {
        let img = image::load_from_memory(bytes).map_err(|e| TextureError::Load(e.to_string()))?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: image::DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        let data = img.to_rgba8().into_raw();
        Self {
            width,
            height,
            data,
            name: name.to_string(),
        }
    }

    /// A 1x1 texture of a single color.
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    /// A checkerboard of 8x8-pixel squares in two colors.
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / 8) + (y / 8)) % 2 == 0;
                data.extend_from_slice(if is_even { &color1 } else { &color2 });
            }
        }
        Self {
            width: size,
            height: size,
            data,
            name: "checkerboard".to_string(),
        }
    }
}

/// A 2D texture resource.
///
/// Starts out ready when constructed with image data, or pending when the
/// data arrives later (e.g. a background loader). The renderer skips
/// binding until `is_ready()` and caches the uploaded GPU handle here so
/// the upload happens once.
#[derive(Debug)]
pub struct Texture {
    image: ImageData,
    ready: bool,
    pub(crate) gpu: Option<TextureHandle>,
}

impl Texture {
    /// A texture that is immediately ready to upload.
    pub fn new(image: ImageData) -> Self {
        Self {
            image,
            ready: true,
            gpu: None,
        }
    }

    /// A placeholder texture; not bound until image data is supplied.
    pub fn pending(name: &str) -> Self {
        Self {
            image: ImageData::solid_color([0, 0, 0, 0], name),
            ready: false,
            gpu: None,
        }
    }

    /// Supplies image data, marking the texture ready and dropping any
    /// previously uploaded GPU copy.
    pub fn set_image(&mut self, image: ImageData) {
        self.image = image;
        self.ready = true;
        self.gpu = None;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn image(&self) -> &ImageData {
        &self.image
    }
}

/// A cube environment map: six square faces in +X, -X, +Y, -Y, +Z, -Z
/// order.
#[derive(Debug)]
pub struct EnvironmentMap {
    faces: [ImageData; 6],
    ready: bool,
    pub(crate) gpu: Option<TextureHandle>,
}

impl EnvironmentMap {
    pub fn new(faces: [ImageData; 6]) -> Self {
        Self {
            faces,
            ready: true,
            gpu: None,
        }
    }

    /// A placeholder environment map; not bound until faces are supplied.
    pub fn pending(name: &str) -> Self {
        let face = ImageData::solid_color([0, 0, 0, 0], name);
        Self {
            faces: [
                face.clone(),
                face.clone(),
                face.clone(),
                face.clone(),
                face.clone(),
                face,
            ],
            ready: false,
            gpu: None,
        }
    }

    pub fn set_faces(&mut self, faces: [ImageData; 6]) {
        self.faces = faces;
        self.ready = true;
        self.gpu = None;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn faces(&self) -> &[ImageData; 6] {
        &self.faces
    }
}
