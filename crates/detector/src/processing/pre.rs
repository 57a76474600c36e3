use crate::config::DEFAULT_INPUT_SIZE;
use crate::input::{BgrImage, image_dimensions};
use common::{span, span_debug};
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use ndarray::{Array2, Array4, ArrayViewMut3, Axis};

const LETTERBOX_COLOR: u8 = 128;

/// Mapping from original pixels to model input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

/// A batch ready for the backend.
pub struct PreprocessedBatch {
    /// `[N, 3, H, W]`, RGB scaled to `[0, 1]`
    pub images: Array4<f32>,
    /// `[N, 2]` original `(height, width)` per image
    pub image_shapes: Array2<f32>,
    /// Original `(width, height)` per image
    pub sizes: Vec<(u32, u32)>,
}

pub struct PreProcessor {
    pub input_size: (u32, u32),
    rgb_buffer: Vec<u8>,
    letterboxed_buffer: Vec<u8>,
}

impl PreProcessor {
    pub fn new(input_size: (u32, u32)) -> Self {
        Self {
            input_size,
            rgb_buffer: Vec::with_capacity(1920 * 1080 * 3),
            letterboxed_buffer: vec![LETTERBOX_COLOR; (input_size.0 * input_size.1 * 3) as usize],
        }
    }

    pub fn preprocess_batch(&mut self, images: &[&BgrImage]) -> anyhow::Result<PreprocessedBatch> {
        let _s = span!("preprocess_batch");

        let (input_w, input_h) = self.input_size;
        let n = images.len();
        let mut batch = Array4::<f32>::zeros((n, 3, input_h as usize, input_w as usize));
        let mut image_shapes = Array2::<f32>::zeros((n, 2));
        let mut sizes = Vec::with_capacity(n);

        for (i, image) in images.iter().enumerate() {
            let (width, height) = image_dimensions(image)?;
            self.preprocess_into(image, batch.index_axis_mut(Axis(0), i))?;
            image_shapes[[i, 0]] = height as f32;
            image_shapes[[i, 1]] = width as f32;
            sizes.push((width, height));
        }

        Ok(PreprocessedBatch {
            images: batch,
            image_shapes,
            sizes,
        })
    }

    /// Letterbox one image into a `[3, H, W]` slot of the batch tensor.
    pub fn preprocess_into(
        &mut self,
        image: &BgrImage,
        out: ArrayViewMut3<f32>,
    ) -> anyhow::Result<Letterbox> {
        let (width, height) = image_dimensions(image)?;

        tracing::trace!(width, height, "Preprocessing image dimensions");

        self.copy_rgb_pixels(image);
        let letterbox = self.resize_and_letterbox(width, height)?;
        self.normalize(out)?;

        Ok(letterbox)
    }

    fn copy_rgb_pixels(&mut self, image: &BgrImage) {
        let _s = span_debug!("copy_rgb_pixels");

        self.rgb_buffer.clear();
        self.rgb_buffer.reserve(image.len());
        for px in image.rows() {
            self.rgb_buffer.extend_from_slice(&[px[2], px[1], px[0]]);
        }
    }

    fn resize_and_letterbox(&mut self, width: u32, height: u32) -> anyhow::Result<Letterbox> {
        let _s = span_debug!("resize_and_letterbox");

        let (input_w, input_h) = self.input_size;
        let scale = (input_w as f32 / width as f32).min(input_h as f32 / height as f32);
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, input_w);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, input_h);

        let offset_x = (input_w - new_width) / 2;
        let offset_y = (input_h - new_height) / 2;

        let src = ImageRef::new(width, height, &self.rgb_buffer, PixelType::U8x3)?;

        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        Resizer::new().resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::CatmullRom)),
        )?;

        self.letterboxed_buffer.fill(LETTERBOX_COLOR);

        let resized_data = resized.buffer();
        let stride = input_w * 3;
        let row_bytes = (new_width * 3) as usize;

        for y in 0..new_height {
            let src_row = (y * new_width * 3) as usize;
            let dst_row = ((y + offset_y) * stride + offset_x * 3) as usize;

            self.letterboxed_buffer[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized_data[src_row..src_row + row_bytes]);
        }

        Ok(Letterbox {
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        })
    }

    fn normalize(&self, mut out: ArrayViewMut3<f32>) -> anyhow::Result<()> {
        let _s = span_debug!("normalize");

        let (input_w, input_h) = self.input_size;
        let expected = (3, input_h as usize, input_w as usize);
        if out.dim() != expected {
            anyhow::bail!(
                "Input tensor slot mismatch: expected {:?}, got {:?}",
                expected,
                out.dim()
            );
        }

        let width = input_w as usize;
        for (i, px) in self.letterboxed_buffer.chunks_exact(3).enumerate() {
            let (y, x) = (i / width, i % width);
            out[[0, y, x]] = px[0] as f32 / 255.0;
            out[[1, y, x]] = px[1] as f32 / 255.0;
            out[[2, y, x]] = px[2] as f32 / 255.0;
        }

        Ok(())
    }
}

impl Default for PreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}
