#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::yolo::{self, DecodeOptions, Letterbox};
use crate::frame::Frame;

/// Grey used to fill letterbox padding, matching the YOLOv5 export.
const LETTERBOX_FILL: u8 = 114;

/// Tract-based backend for a YOLOv5 ONNX export.
///
/// The model is loaded from a local weights file once; inference performs no
/// network I/O.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    labels: Vec<String>,
    options: DecodeOptions,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("model label list is empty"));
        }
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            labels,
            options: DecodeOptions::default(),
        })
    }

    /// Override the decode thresholds.
    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<(Tensor, Letterbox)> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("empty frame {}x{}", width, height));
        }
        let letterbox = Letterbox::fit(width, height, self.input_size);
        let scaled_w = ((width as f32 * letterbox.scale).round() as u32).max(1);
        let scaled_h = ((height as f32 * letterbox.scale).round() as u32).max(1);
        let resized =
            image::imageops::resize(frame.as_image(), scaled_w, scaled_h, FilterType::Triangle);

        let size = self.input_size as usize;
        let pad_x = letterbox.pad_x as u32;
        let pad_y = letterbox.pad_y as u32;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            let (x, y) = (x as u32, y as u32);
            let value = if x >= pad_x && y >= pad_y {
                resized
                    .get_pixel_checked(x - pad_x, y - pad_y)
                    .map(|p| p.0[c])
                    .unwrap_or(LETTERBOX_FILL)
            } else {
                LETTERBOX_FILL
            };
            value as f32 / 255.0
        });

        Ok((input.into_tensor(), letterbox))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = view.iter().copied().collect();
        yolo::decode(
            &flat,
            &self.labels,
            letterbox,
            frame.width(),
            frame.height(),
            self.options,
        )
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::new(self.input_size, self.input_size);
        self.detect(&blank).map(|_| ())
    }
}
