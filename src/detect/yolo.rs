//! YOLOv5 output decoding.
//!
//! The exported model emits one row per anchor:
//! `[cx, cy, w, h, objectness, class_0, class_1, ...]` in letterboxed input
//! pixels. Decoding scores each row as objectness times its best class score,
//! maps the box back to frame pixels and runs class-wise non-maximum
//! suppression. Kept free of the inference runtime so it is testable without
//! model weights.

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection};

/// Geometry of the letterbox applied when resizing a frame to the model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    /// Scale from frame pixels to input pixels.
    pub scale: f32,
    /// Horizontal padding (input pixels) on the left edge.
    pub pad_x: f32,
    /// Vertical padding (input pixels) on the top edge.
    pub pad_y: f32,
}

impl Letterbox {
    /// Letterbox for fitting `width` x `height` into a square `input_size` canvas.
    pub fn fit(width: u32, height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let scaled_w = (width as f32 * scale).round();
        let scaled_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((input_size as f32 - scaled_w) / 2.0).floor(),
            pad_y: ((input_size as f32 - scaled_h) / 2.0).floor(),
        }
    }

    /// Identity mapping, for outputs already in frame pixels.
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        }
    }

    fn to_frame(self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Thresholds applied while decoding.
#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
    /// Rows scoring below this are discarded before suppression.
    pub min_confidence: f32,
    /// IoU above which a lower-scoring box of the same class is suppressed.
    pub nms_threshold: f32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.25,
            nms_threshold: 0.45,
        }
    }
}

/// Decode a flat `[rows x (5 + labels.len())]` output tensor into detections.
///
/// Boxes are clamped to the `frame_width` x `frame_height` grid. Rows whose box
/// collapses after clamping are dropped.
pub fn decode(
    output: &[f32],
    labels: &[String],
    letterbox: Letterbox,
    frame_width: u32,
    frame_height: u32,
    options: DecodeOptions,
) -> Result<Vec<Detection>> {
    if labels.is_empty() {
        return Err(anyhow!("model label list is empty"));
    }
    let stride = 5 + labels.len();
    if output.len() % stride != 0 {
        return Err(anyhow!(
            "model output length {} is not a multiple of row width {}",
            output.len(),
            stride
        ));
    }

    let max_x = frame_width as f32;
    let max_y = frame_height as f32;
    let mut candidates: Vec<(usize, Detection)> = Vec::new();
    for row in output.chunks_exact(stride) {
        let objectness = row[4];
        let Some((class_id, class_score)) = row[5..]
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        let score = objectness * class_score;
        if !score.is_finite() || score < options.min_confidence {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);
        let Ok(bbox) = BoundingBox::new(
            x1.clamp(0.0, max_x),
            y1.clamp(0.0, max_y),
            x2.clamp(0.0, max_x),
            y2.clamp(0.0, max_y),
        ) else {
            continue;
        };
        candidates.push((class_id, Detection::new(labels[class_id].clone(), score, bbox)));
    }

    Ok(non_maximum_suppression(candidates, options.nms_threshold))
}

/// Class-wise greedy NMS. Output is ordered by descending confidence.
pub fn non_maximum_suppression(
    mut candidates: Vec<(usize, Detection)>,
    iou_threshold: f32,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    let mut kept: Vec<(usize, Detection)> = Vec::with_capacity(candidates.len());
    for (class_id, detection) in candidates {
        let suppressed = kept.iter().any(|(kept_class, kept_det)| {
            *kept_class == class_id && kept_det.bbox.iou(&detection.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push((class_id, detection));
        }
    }
    kept.into_iter().map(|(_, detection)| detection).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["insect".to_string(), "bird".to_string()]
    }

    #[test]
    fn letterbox_fit_pads_the_short_side() {
        let lb = Letterbox::fit(640, 480, 640);
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
    }

    #[test]
    fn decode_scores_rows_and_undoes_letterbox() {
        let lb = Letterbox::fit(640, 480, 640);
        // cx=100, cy=180 (pad 80 -> frame y=100), 40x40, obj=0.9, insect=1.0
        let output = vec![
            100.0, 180.0, 40.0, 40.0, 0.9, 1.0, 0.1, //
            300.0, 300.0, 20.0, 20.0, 0.1, 0.5, 0.2,
        ];
        let dets = decode(&output, &labels(), lb, 640, 480, DecodeOptions::default()).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "insect");
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(dets[0].bbox, BoundingBox::new(80.0, 80.0, 120.0, 120.0).unwrap());
    }

    #[test]
    fn nms_suppresses_overlapping_boxes_of_same_class_only() {
        let output = vec![
            50.0, 50.0, 20.0, 20.0, 0.9, 1.0, 0.0, //
            51.0, 51.0, 20.0, 20.0, 0.8, 1.0, 0.0, //
            51.0, 51.0, 20.0, 20.0, 0.7, 0.0, 1.0,
        ];
        let dets = decode(
            &output,
            &labels(),
            Letterbox::identity(),
            200,
            200,
            DecodeOptions::default(),
        )
        .unwrap();
        let names: Vec<&str> = dets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(names, vec!["insect", "bird"]);
    }

    #[test]
    fn decode_rejects_misaligned_output() {
        let err = decode(
            &[0.0; 6],
            &labels(),
            Letterbox::identity(),
            10,
            10,
            DecodeOptions::default(),
        );
        assert!(err.is_err());
    }
}
