use crate::error::DetectionError;
use image::{Rgb, RgbImage};
use ndarray::Array3;
use std::path::{Path, PathBuf};

/// In-memory image laid out `[height, width, 3]` in BGR channel order.
pub type BgrImage = Array3<u8>;

/// Images to run detection on: either files to read or decoded pixel arrays.
#[derive(Debug, Clone)]
pub enum InferenceInput {
    Paths(Vec<PathBuf>),
    Images(Vec<BgrImage>),
}

impl InferenceInput {
    /// Build from two optional lists, as received at loosely typed boundaries.
    /// Exactly one must be set.
    pub fn from_parts(
        paths: Option<Vec<PathBuf>>,
        images: Option<Vec<BgrImage>>,
    ) -> Result<Self, DetectionError> {
        match (paths, images) {
            (Some(paths), None) => Ok(InferenceInput::Paths(paths)),
            (None, Some(images)) => Ok(InferenceInput::Images(images)),
            (Some(_), Some(_)) => Err(DetectionError::InvalidInput(
                "supply either paths or images, not both".to_string(),
            )),
            (None, None) => Err(DetectionError::InvalidInput(
                "one of paths or images is required".to_string(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            InferenceInput::Paths(paths) => paths.len(),
            InferenceInput::Images(images) => images.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read and validate every input up front so a bad image fails the call
    /// before any forward pass runs.
    pub(crate) fn load(self) -> Result<Vec<LoadedImage>, DetectionError> {
        match self {
            InferenceInput::Paths(paths) => paths
                .into_iter()
                .map(|path| {
                    let image = load_image(&path)?;
                    Ok(LoadedImage {
                        image,
                        source: Some(path),
                    })
                })
                .collect(),
            InferenceInput::Images(images) => images
                .into_iter()
                .map(|image| {
                    image_dimensions(&image)?;
                    Ok(LoadedImage {
                        image,
                        source: None,
                    })
                })
                .collect(),
        }
    }
}

pub(crate) struct LoadedImage {
    pub image: BgrImage,
    pub source: Option<PathBuf>,
}

/// Returns `(width, height)` after checking the `[H, W, 3]` layout.
pub fn image_dimensions(image: &BgrImage) -> Result<(u32, u32), DetectionError> {
    let shape = image.shape();
    if shape[2] != 3 {
        return Err(DetectionError::ShapeMismatch(format!(
            "expected [height, width, 3] BGR layout, got {:?}",
            shape
        )));
    }
    if shape[0] == 0 || shape[1] == 0 {
        return Err(DetectionError::ShapeMismatch(format!(
            "image has no pixels: {:?}",
            shape
        )));
    }
    Ok((shape[1] as u32, shape[0] as u32))
}

pub fn load_image(path: &Path) -> Result<BgrImage, DetectionError> {
    let decoded = image::open(path).map_err(|source| DetectionError::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), width = decoded.width(), height = decoded.height(), "Loaded image");
    Ok(rgb_to_bgr(&decoded.to_rgb8()))
}

/// Decode an encoded image (JPEG, PNG, BMP, WebP) from memory.
pub fn decode_image(bytes: &[u8]) -> Result<BgrImage, DetectionError> {
    let decoded = image::load_from_memory(bytes).map_err(DetectionError::ImageDecode)?;
    Ok(rgb_to_bgr(&decoded.to_rgb8()))
}

pub fn rgb_to_bgr(image: &RgbImage) -> BgrImage {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32)[2 - c]
    })
}

pub fn bgr_to_rgb(image: &BgrImage) -> Result<RgbImage, DetectionError> {
    let (width, height) = image_dimensions(image)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([image[[y, x, 2]], image[[y, x, 1]], image[[y, x, 0]]])
    }))
}
