//! HTTP camera source.
//!
//! Connects to an `http(s)://` camera URL. A `multipart/*` response is read as an
//! MJPEG stream and split on JPEG SOI/EOI markers; any other response is treated as
//! a snapshot endpoint and re-fetched for every frame.

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;
use std::io::Read;
use std::time::{Duration, Instant};

use super::SourceStats;
use crate::frame::RawFrame;
use crate::pace::fps_interval;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct HttpSource {
    url: String,
    target_fps: u32,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    Snapshot,
}

impl HttpSource {
    pub(crate) fn new(url: &str, target_fps: u32) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self {
            url: url.to_string(),
            target_fps,
            agent,
            stream: None,
            connected_at: None,
            last_frame_at: None,
            frame_count: 0,
            last_error: None,
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to camera {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            log::info!("camera {}: MJPEG stream", self.url);
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
        } else {
            log::info!("camera {}: snapshot endpoint ({})", self.url, content_type);
            self.stream = Some(HttpStream::Snapshot);
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        match self.read_frame() {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn read_frame(&mut self) -> Result<RawFrame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("http camera not connected; call connect() first"))?;
        let min_interval = fps_interval(self.target_fps);
        loop {
            let jpeg = match stream {
                HttpStream::Mjpeg(stream) => stream.read_next_jpeg()?,
                HttpStream::Snapshot => fetch_snapshot(&self.agent, &self.url)?,
            };

            // Drop frames that arrive faster than the target rate so the stream stays live.
            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    if matches!(stream, HttpStream::Snapshot) {
                        std::thread::sleep(min_interval - now.duration_since(last));
                    }
                    continue;
                }
            }

            let (pixels, width, height) = decode_jpeg(&jpeg)?;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return RawFrame::new(pixels, width, height, self.frame_count);
        }
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.target_fps)
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
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
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_snapshot(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read snapshot body")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty snapshot from {}", url));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    Ok((image.into_rgb8().into_raw(), width, height))
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|pair| pair == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|pair| pair == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn health_grace(target_fps: u32) -> Duration {
    let base = fps_interval(target_fps).saturating_mul(6);
    base.max(Duration::from_secs(2))
}
