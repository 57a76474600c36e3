use crate::backend::InferenceOutput;
use crate::types::Detection;
use ndarray::ArrayViewD;

pub struct PostProcessor {
    pub labels: Vec<String>,
}

impl PostProcessor {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Turn the NMS-selected indices of one forward pass into per-image detections.
    ///
    /// `sizes` holds the original `(width, height)` of each image in the batch.
    /// Rows with a negative component are padding and skipped.
    #[tracing::instrument(skip(self, output, sizes), fields(batch = sizes.len()))]
    pub fn parse_detections(
        &self,
        output: &InferenceOutput,
        sizes: &[(u32, u32)],
        score_thresh: f32,
    ) -> anyhow::Result<Vec<Vec<Detection>>> {
        let boxes = output.boxes.view();
        let scores = output.scores.view();
        let (num_boxes, num_classes) = check_shapes(&boxes, &scores, sizes.len())?;

        let index_shape = output.indices.shape();
        if index_shape.last() != Some(&3) {
            anyhow::bail!(
                "indices must have a trailing dimension of 3, got {:?}",
                index_shape
            );
        }

        let mut detections: Vec<Vec<Detection>> = vec![Vec::new(); sizes.len()];
        let flat: Vec<i32> = output.indices.iter().copied().collect();

        for row in flat.chunks_exact(3) {
            if row.iter().any(|&v| v < 0) {
                continue;
            }
            let (b, c, j) = (row[0] as usize, row[1] as usize, row[2] as usize);

            if b >= sizes.len() || c >= num_classes || j >= num_boxes {
                anyhow::bail!(
                    "index ({}, {}, {}) out of range for batch {}, {} classes, {} boxes",
                    b,
                    c,
                    j,
                    sizes.len(),
                    num_classes,
                    num_boxes
                );
            }

            let confidence = scores[[b, c, j]];
            if !(confidence >= score_thresh) {
                continue;
            }

            let label = self.labels.get(c).ok_or_else(|| {
                anyhow::anyhow!("class id {} has no label ({} labels)", c, self.labels.len())
            })?;

            let (width, height) = sizes[b];
            let (left, top, right, bottom) = clip_box(
                [
                    boxes[[b, j, 1]],
                    boxes[[b, j, 0]],
                    boxes[[b, j, 3]],
                    boxes[[b, j, 2]],
                ],
                width,
                height,
            );

            detections[b].push(Detection {
                label: label.clone(),
                confidence: confidence.clamp(0.0, 1.0),
                left,
                top,
                right,
                bottom,
            });
        }

        Ok(detections)
    }
}

/// Returns `(num_boxes, num_classes)` after checking boxes `[N, B, 4]` and scores `[N, C, B]`.
fn check_shapes(
    boxes: &ArrayViewD<f32>,
    scores: &ArrayViewD<f32>,
    batch: usize,
) -> anyhow::Result<(usize, usize)> {
    let b = boxes.shape();
    let s = scores.shape();

    if b.len() != 3 || b[2] != 4 || b[0] != batch {
        anyhow::bail!("boxes must be [{}, B, 4], got {:?}", batch, b);
    }
    if s.len() != 3 || s[0] != batch || s[2] != b[1] {
        anyhow::bail!("scores must be [{}, C, {}], got {:?}", batch, b[1], s);
    }

    Ok((b[1], s[1]))
}

/// Clip `[x1, y1, x2, y2]` to the image and round to ordered integer pixel corners.
#[inline]
fn clip_box(xyxy: [f32; 4], width: u32, height: u32) -> (i32, i32, i32, i32) {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;

    let clamp_x = |v: f32| v.max(0.0).min(max_x).round() as i32;
    let clamp_y = |v: f32| v.max(0.0).min(max_y).round() as i32;

    let [x1, y1, x2, y2] = xyxy;
    let (x1, x2) = (clamp_x(x1), clamp_x(x2));
    let (y1, y2) = (clamp_y(y1), clamp_y(y2));

    (x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2))
}
