//! MJPEG-over-HTTP frame source.
//!
//! Network cameras (and other instances of this service) publish
//! `multipart/x-mixed-replace` JPEG streams. The source reads the body,
//! splits it on JPEG SOI/EOI markers and decodes each image in memory. A
//! server answering with a single JPEG is polled once per frame instead.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{frame_interval, health_grace, CameraConfig, FrameSource, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct MjpegSource {
    config: CameraConfig,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Multipart(MjpegReader),
    SingleJpeg,
}

impl MjpegSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let url = Url::parse(&config.source).context("parse mjpeg source url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported mjpeg scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        Ok(Self {
            config,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            last_error: None,
        })
    }

    fn read_jpeg(&mut self) -> Result<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("mjpeg source not connected; call connect() first"))?;
        match stream {
            HttpStream::Multipart(reader) => reader.read_next_jpeg(),
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.config.source),
        }
    }
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(&self.config.source)
            .call()
            .with_context(|| format!("connect to mjpeg stream {}", self.config.source))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            self.stream = Some(HttpStream::Multipart(MjpegReader::new(
                response.into_reader(),
            )));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("MjpegSource: connected to {}", self.config.source);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            // snapshots are pulled, so wait out the interval instead of re-fetching
            if matches!(self.stream, Some(HttpStream::SingleJpeg)) {
                if let Some(last) = self.last_frame_at {
                    let elapsed = last.elapsed();
                    if elapsed < min_interval {
                        std::thread::sleep(min_interval - elapsed);
                    }
                }
            }

            let jpeg = self.read_jpeg().map_err(|err| {
                self.last_error = Some(err.to_string());
                err
            })?;

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let frame = decode_jpeg(&jpeg)?;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(frame);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.source.clone(),
        }
    }
}

/// Incremental JPEG splitter over a multipart body.
pub(crate) struct MjpegReader {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegReader {
    pub(crate) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    pub(crate) fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(Frame::from_image(image.into_rgb8()))
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{encode_jpeg, multipart_chunk};
    use std::io::Cursor;

    #[test]
    fn finds_jpeg_between_markers() {
        let data = [0x00, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x03];
        assert_eq!(find_jpeg_bounds(&data), Some((1, 7)));
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 0x01]), None);
    }

    #[test]
    fn reader_splits_multipart_body_into_frames() -> Result<()> {
        let a = encode_jpeg(&Frame::solid(8, 8, [255, 0, 0]), 90)?;
        let b = encode_jpeg(&Frame::solid(8, 8, [0, 0, 255]), 90)?;
        let mut body = multipart_chunk(&a);
        body.extend(multipart_chunk(&b));

        let mut reader = MjpegReader::new(Box::new(Cursor::new(body)));
        assert_eq!(reader.read_next_jpeg()?, a);
        let second = decode_jpeg(&reader.read_next_jpeg()?)?;
        assert_eq!(second.dimensions(), (8, 8));
        assert!(reader.read_next_jpeg().is_err());
        Ok(())
    }

    #[test]
    fn rejects_non_http_scheme() {
        let config = CameraConfig {
            source: "ftp://camera/stream".to_string(),
            ..CameraConfig::default()
        };
        assert!(MjpegSource::new(config).is_err());
    }
}
