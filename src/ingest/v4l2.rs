//! V4L2 camera source (feature `ingest-v4l2`).
//!
//! Asks the device for RGB3 at the configured size and falls back to whatever format
//! it settles on, as long as `normalize` can convert it.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::SourceStats;
use crate::frame::RawFrame;
use crate::pace::fps_interval;

const BUFFER_COUNT: u32 = 4;

pub(crate) struct V4l2Source {
    device_path: String,
    width: u32,
    height: u32,
    target_fps: u32,
    state: Option<DeviceState>,
    format: PixelFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub(crate) fn new(device_path: &str, width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            device_path: device_path.to_string(),
            width,
            height,
            target_fps,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("failed to set RGB3 on {}: {}", self.device_path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} settled on unsupported format {}",
                self.device_path,
                format.fourcc
            )
        })?;

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("failed to set fps on {}: {}", self.device_path, err);
            }
        }

        self.width = format.width;
        self.height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "v4l2 camera {} ({}x{}, {:?})",
            self.device_path,
            self.width,
            self.height,
            self.format
        );
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec())
        });
        let buf = captured.map_err(|err| {
            self.last_error = Some(err.to_string());
            anyhow::Error::new(err).context("capture v4l2 frame")
        })?;

        let (pixels, width, height) = normalize_to_rgb(&buf, self.width, self.height, self.format)
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                err
            })?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        RawFrame::new(pixels, width, height, self.frame_count).map(Some)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        let grace = fps_interval(self.target_fps)
            .saturating_mul(6)
            .max(Duration::from_secs(2));
        last_frame_at.elapsed() <= grace
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.device_path.clone(),
        }
    }
}
