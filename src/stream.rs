//! JPEG encoding and `multipart/x-mixed-replace` framing.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::Frame;

pub const BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Encode a frame as baseline JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    if !(1..=100).contains(&quality) {
        return Err(anyhow!("jpeg quality must be within 1..=100, got {}", quality));
    }
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot encode empty frame {}x{}", width, height));
    }
    let mut out = Vec::with_capacity((width * height / 4) as usize);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(frame.as_rgb_bytes(), width, height, ExtendedColorType::Rgb8)
        .context("encode jpeg")?;
    Ok(out)
}

/// Wrap one JPEG image as a part of the multipart stream.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_frame_is_a_jpeg() {
        let frame = Frame::solid(16, 8, [200, 10, 10]);
        let jpeg = encode_jpeg(&frame, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn encode_rejects_bad_quality() {
        assert!(encode_jpeg(&Frame::new(4, 4), 0).is_err());
        assert!(encode_jpeg(&Frame::new(4, 4), 101).is_err());
    }

    #[test]
    fn multipart_chunk_layout() {
        let chunk = multipart_chunk(b"JPEG");
        assert_eq!(
            chunk,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n".to_vec()
        );
    }
}
