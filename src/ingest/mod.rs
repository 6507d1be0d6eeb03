//! Frame sources.
//!
//! - Synthetic source (`stub://`), for tests and dry runs
//! - MJPEG over HTTP (`http://` / `https://`), for network cameras
//! - V4L2 devices (feature: ingest-v4l2), for local USB cameras
//!
//! A source is opened once at startup and owned by exactly one detection loop.
//! Sources do not retry: a failed capture is reported to the loop, which ends
//! the stream.

mod mjpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Camera selection and capture geometry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    /// `stub://name[?frames=N]`, `http(s)://host/stream`, or a device path.
    pub source: String,
    /// Target frame rate. Sources decimate to this rate; 0 disables decimation.
    pub target_fps: u32,
    /// Preferred width (synthetic and V4L2 sources).
    pub width: u32,
    /// Preferred height (synthetic and V4L2 sources).
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Sequential, non-restartable stream of frames from one capture device.
pub trait FrameSource: Send {
    /// Open the device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. An error means the device returned no frame.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Build and connect the source named by `config.source`.
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    let source = config.source.trim();
    let mut opened: Box<dyn FrameSource> = if source.starts_with("stub://") {
        Box::new(SyntheticSource::new(config.clone())?)
    } else if source.starts_with("http://") || source.starts_with("https://") {
        Box::new(MjpegSource::new(config.clone())?)
    } else {
        open_device(config)?
    };
    opened.connect()?;
    Ok(opened)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(config.clone())?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "camera source '{}' needs the ingest-v4l2 feature",
        config.source
    ))
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

pub(crate) fn validate_geometry(config: &CameraConfig) -> Result<()> {
    if config.width == 0 || config.height == 0 {
        return Err(anyhow!(
            "camera geometry must be non-zero, got {}x{}",
            config.width,
            config.height
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_source_dispatches_stub_scheme() -> Result<()> {
        let config = CameraConfig {
            source: "stub://bench".to_string(),
            width: 32,
            height: 24,
            ..CameraConfig::default()
        };
        let mut source = open_source(&config)?;
        let frame = source.next_frame()?;
        assert_eq!(frame.dimensions(), (32, 24));
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn frame_interval_handles_zero_fps() {
        assert_eq!(frame_interval(0), Duration::from_millis(0));
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(health_grace(10), Duration::from_millis(2_000));
    }
}
