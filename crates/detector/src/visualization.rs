use crate::error::DetectionError;
use crate::input::{BgrImage, bgr_to_rgb};
use crate::types::Detection;
use ab_glyph::{FontVec, PxScale};
use chrono::Utc;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::fs;
use std::path::{Path, PathBuf};

const BOX_THICKNESS: i32 = 2;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [0, 194, 255],
    [52, 69, 147],
];

/// Draws detections onto a copy of the input and writes it to disk.
///
/// Labels are only rendered when a font is configured; boxes are always drawn.
pub struct Visualizer {
    font: Option<FontVec>,
}

impl Visualizer {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    pub fn load_font(path: &Path) -> Result<FontVec, DetectionError> {
        let bytes = fs::read(path)?;
        FontVec::try_from_vec(bytes).map_err(|e| {
            DetectionError::InvalidArgument(format!("invalid font {}: {}", path.display(), e))
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw(
        &self,
        image: &BgrImage,
        detections: &[Detection],
    ) -> Result<RgbImage, DetectionError> {
        let mut canvas = bgr_to_rgb(image)?;

        for det in detections {
            let color = label_color(&det.label);
            self.draw_box(&mut canvas, det, color);
            if let Some(font) = &self.font {
                draw_label(&mut canvas, det, color, font);
            }
        }

        Ok(canvas)
    }

    /// Draw and save, returning where the file landed.
    pub fn save(
        &self,
        image: &BgrImage,
        detections: &[Detection],
        output_dir: &Path,
        source: Option<&Path>,
        index: usize,
    ) -> Result<PathBuf, DetectionError> {
        let canvas = self.draw(image, detections)?;

        fs::create_dir_all(output_dir)?;
        let path = save_path_for(output_dir, source, index);

        canvas
            .save(&path)
            .map_err(|source| DetectionError::Visualization {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), detections = detections.len(), "Saved annotated image");
        Ok(path)
    }

    fn draw_box(&self, canvas: &mut RgbImage, det: &Detection, color: Rgb<u8>) {
        for t in 0..BOX_THICKNESS {
            let width = det.width() - 2 * t + 1;
            let height = det.height() - 2 * t + 1;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(det.left + t, det.top + t).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new(None)
    }
}

fn draw_label(canvas: &mut RgbImage, det: &Detection, color: Rgb<u8>, font: &FontVec) {
    let text = format!("{} {:.2}", det.label, det.confidence);
    let scale = PxScale::from(LABEL_FONT_SIZE);
    let (text_w, text_h) = text_size(scale, font, &text);

    let label_w = text_w as i32 + 2 * LABEL_PADDING;
    let label_h = text_h as i32 + 2 * LABEL_PADDING;

    // Above the box when there is room, otherwise inside its top edge
    let label_y = if det.top >= label_h {
        det.top - label_h
    } else {
        det.top
    };

    let rect = Rect::at(det.left, label_y).of_size(label_w.max(1) as u32, label_h.max(1) as u32);
    draw_filled_rect_mut(canvas, rect, color);
    draw_text_mut(
        canvas,
        TEXT_COLOR,
        det.left + LABEL_PADDING,
        label_y + LABEL_PADDING,
        scale,
        font,
        &text,
    );
}

/// Stable colour per label.
fn label_color(label: &str) -> Rgb<u8> {
    let hash = label
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    Rgb(PALETTE[hash % PALETTE.len()])
}

/// Path inputs keep their file name, in-memory images are numbered by input
/// position. An existing file is never overwritten: a timestamp is appended.
pub fn save_path_for(output_dir: &Path, source: Option<&Path>, index: usize) -> PathBuf {
    let mut file_name = match source.and_then(Path::file_name) {
        Some(name) => PathBuf::from(name),
        None => PathBuf::from(format!("image_numpy_{}.jpg", index)),
    };

    let writable = file_name
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false);
    if !writable {
        file_name.set_extension("jpg");
    }

    let candidate = output_dir.join(&file_name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = file_name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = file_name
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jpg".to_string());

    output_dir.join(format!(
        "{}_time={}.{}",
        stem,
        Utc::now().format("%Y%m%d%H%M%S%6f"),
        ext
    ))
}
