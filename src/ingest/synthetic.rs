use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{validate_geometry, CameraConfig, FrameSource, SourceStats};
use crate::frame::Frame;

/// Deterministic frame generator for `stub://` sources.
///
/// Produces a moving gradient. `stub://name?frames=N` makes capture fail after
/// N frames, which is how a device that stops returning frames looks to the
/// loop.
pub struct SyntheticSource {
    config: CameraConfig,
    frame_limit: Option<u64>,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        validate_geometry(&config)?;
        let url = Url::parse(&config.source).context("parse stub source url")?;
        if url.scheme() != "stub" {
            return Err(anyhow!("synthetic source expects stub://, got {}", config.source));
        }
        let frame_limit = url
            .query_pairs()
            .find(|(k, _)| k == "frames")
            .map(|(_, v)| {
                v.parse::<u64>()
                    .map_err(|_| anyhow!("stub frame limit must be an integer, got '{}'", v))
            })
            .transpose()?;
        Ok(Self {
            config,
            frame_limit,
            frame_count: 0,
            connected: false,
        })
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let shift = self.frame_count as usize;
        let mut pixels = vec![0u8; w * h * 3];
        for y in 0..h {
            for x in 0..w {
                let offset = (y * w + x) * 3;
                pixels[offset] = ((x + shift) % 256) as u8;
                pixels[offset + 1] = (y % 256) as u8;
                pixels[offset + 2] = 96;
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} (synthetic)",
            self.config.source
        );
        self.connected = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if let Some(limit) = self.frame_limit {
            if self.frame_count >= limit {
                return Err(anyhow!(
                    "synthetic source exhausted after {} frames",
                    self.frame_count
                ));
            }
        }
        let pixels = self.generate_pixels();
        self.frame_count += 1;
        Frame::from_rgb(self.config.width, self.config.height, pixels)
    }

    fn is_healthy(&self) -> bool {
        self.connected
            && self
                .frame_limit
                .map_or(true, |limit| self.frame_count < limit)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.source.clone(),
        }
    }
}
