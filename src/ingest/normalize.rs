use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    /// Map a V4L2 FourCC to a supported format.
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Result<Self> {
        match fourcc {
            b"RGB3" => Ok(PixelFormat::Rgb24),
            b"YUYV" => Ok(PixelFormat::Yuyv),
            b"NV12" => Ok(PixelFormat::Nv12),
            other => Err(anyhow!(
                "unsupported pixel format {}",
                String::from_utf8_lossy(other)
            )),
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = width
                .checked_mul(height)
                .and_then(|v| v.checked_mul(3))
                .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
            if pixels.len() < expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Ok(pixels[..expected].to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
    }
}

/// YUYV 4:2:2: each 4-byte group `Y0 U Y1 V` covers two pixels.
fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    if width % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", width));
    }
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    let expected = pixel_count * 2;
    if pixels.len() < expected {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for group in pixels[..expected].chunks_exact(4) {
        let u = group[1] as f32 - 128.0;
        let v = group[3] as f32 - 128.0;
        for y in [group[0], group[2]] {
            rgb.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    Ok(rgb)
}

/// NV12 4:2:0: a full Y plane followed by one interleaved `U V` pair per
/// 2x2 block.
fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    if width % 2 != 0 || height % 2 != 0 {
        return Err(anyhow!(
            "NV12 frame dimensions must be even, got {}x{}",
            width,
            height
        ));
    }
    let (w, h) = (width as usize, height as usize);
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let expected = y_plane + y_plane / 2;
    if pixels.len() < expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let (luma, chroma) = pixels[..expected].split_at(y_plane);
    let mut rgb = Vec::with_capacity(y_plane * 3);
    for row in 0..h {
        let chroma_row = &chroma[(row / 2) * w..(row / 2) * w + w];
        for col in 0..w {
            let pair = (col / 2) * 2;
            let u = chroma_row[pair] as f32 - 128.0;
            let v = chroma_row[pair + 1] as f32 - 128.0;
            rgb.extend_from_slice(&yuv_to_rgb(luma[row * w + col], u, v));
        }
    }
    Ok(rgb)
}

/// BT.601 full-range conversion; `u` and `v` are already centred on zero.
fn yuv_to_rgb(y: u8, u: f32, v: f32) -> [u8; 3] {
    let y = y as f32;
    [
        clamp_to_u8(y + 1.402_f32 * v),
        clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v),
        clamp_to_u8(y + 1.772_f32 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<()> {
        let yuyv = vec![128u8; 2 * 2 * 2];
        let rgb = normalize_to_rgb(&yuyv, 2, 2, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn nv12_conversion_uses_shared_chroma_per_block() -> Result<()> {
        // 2x2 luma, one chroma pair pushing blue up and red down
        let nv12 = vec![100, 100, 100, 100, 200, 56];
        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(rgb.len(), 12);
        let first = [rgb[0], rgb[1], rgb[2]];
        assert!(rgb.chunks_exact(3).all(|px| px == first));
        assert!(first[2] > first[0]);

        assert!(normalize_to_rgb(&nv12[..5], 2, 2, PixelFormat::Nv12).is_err());
        assert!(normalize_to_rgb(&[0u8; 9], 3, 2, PixelFormat::Nv12).is_err());
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() -> Result<()> {
        let pixels = vec![1u8; 9];
        let rgb = normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24)?;
        assert_eq!(rgb, pixels);
        assert!(normalize_to_rgb(&pixels, 2, 3, PixelFormat::Rgb24).is_err());
        Ok(())
    }

    #[test]
    fn fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV").unwrap(), PixelFormat::Yuyv);
        assert_eq!(PixelFormat::from_fourcc(b"NV12").unwrap(), PixelFormat::Nv12);
        assert!(PixelFormat::from_fourcc(b"MJPG").is_err());
    }
}
