//! Captured frame container.
//!
//! A `Frame` is one RGB8 pixel grid produced by a frame source. It lives for a
//! single loop iteration: the detector reads it, the annotator draws on it in
//! place, and the encoder consumes it.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

/// Number of interleaved channels in a frame (RGB).
pub const CHANNELS: usize = 3;

/// Mutable RGB8 pixel grid (height x width x 3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Black frame of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    /// Frame filled with a single colour.
    pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, Rgb(color)),
        }
    }

    /// Build a frame from interleaved RGB bytes. The length must match the dimensions.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("invalid RGB buffer for {}x{}", width, height))?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Pixel at (x, y), or `None` outside the grid.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.image.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Set a pixel, ignoring coordinates outside the grid.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if let Some(pixel) = self.image.get_pixel_mut_checked(x, y) {
            *pixel = Rgb(color);
        }
    }

    /// Interleaved RGB bytes, row-major.
    pub fn as_rgb_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(2, 2, vec![0u8; 12]).is_ok());
        assert!(Frame::from_rgb(2, 2, vec![0u8; 11]).is_err());
    }

    #[test]
    fn set_pixel_outside_grid_is_ignored() {
        let mut frame = Frame::solid(4, 4, [1, 2, 3]);
        frame.set_pixel(10, 10, [9, 9, 9]);
        frame.set_pixel(1, 1, [9, 9, 9]);
        assert_eq!(frame.pixel(1, 1), Some([9, 9, 9]));
        assert_eq!(frame.pixel(0, 0), Some([1, 2, 3]));
        assert_eq!(frame.pixel(4, 0), None);
    }
}
