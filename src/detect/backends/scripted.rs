use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Backend that returns a fixed detection list for every frame.
///
/// Used for dry runs without model weights and as a test double.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    detections: Vec<Detection>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: 0,
        }
    }

    /// Backend that never detects anything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of frames passed to `detect`.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        Ok(self.detections.clone())
    }
}
