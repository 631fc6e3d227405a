//! Camera frame sources.
//!
//! A camera URL selects the backend:
//! - `stub://name[?frames=N]`: synthetic noise frames (tests, demos)
//! - `http(s)://...`: MJPEG stream or JPEG snapshot endpoint
//! - `/dev/videoN` or `v4l2:///dev/videoN`: local V4L2 device (feature: ingest-v4l2)
//!
//! Every backend yields RGB24 `RawFrame`s. `CameraSource` applies the configured
//! rotation before handing a frame on.

mod http;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::{anyhow, Result};

use crate::config::CameraSettings;
use crate::frame::{RawFrame, Rotation};

/// Sequential, blocking frame producer.
///
/// `next_frame` returns `Ok(None)` once a bounded source is exhausted. An error means the
/// source must be reopened.
pub trait FrameSource: Send {
    fn describe(&self) -> String;
    fn connect(&mut self) -> Result<()>;
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;
    fn is_healthy(&self) -> bool;
    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

pub struct CameraSource {
    backend: CameraBackend,
    rotation: Rotation,
}

enum CameraBackend {
    Synthetic(synthetic::SyntheticSource),
    Http(http::HttpSource),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(v4l2::V4l2Source),
}

impl CameraSource {
    pub fn new(settings: &CameraSettings) -> Result<Self> {
        let url = settings.url.trim();
        let backend = if url.starts_with("stub://") {
            CameraBackend::Synthetic(synthetic::SyntheticSource::new(
                url,
                settings.width,
                settings.height,
                settings.target_fps,
            )?)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            CameraBackend::Http(http::HttpSource::new(url, settings.target_fps))
        } else if let Some(device) = device_path(url) {
            open_device(device, settings)?
        } else {
            return Err(anyhow!(
                "unsupported camera url '{}'; expected stub://, http(s):// or a /dev/video device",
                url
            ));
        };
        Ok(Self {
            backend,
            rotation: settings.rotation,
        })
    }
}

impl FrameSource for CameraSource {
    fn describe(&self) -> String {
        let stats = self.stats();
        match self.rotation {
            Rotation::None => stats.source,
            rotation => format!("{} (rotated {})", stats.source, rotation.degrees()),
        }
    }

    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            CameraBackend::Http(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let frame = match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            CameraBackend::Http(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.next_frame(),
        }?;
        match frame {
            Some(frame) => frame.rotated(self.rotation).map(Some),
            None => Ok(None),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
            CameraBackend::Http(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            CameraBackend::Http(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.stats(),
        }
    }
}

/// Build and connect the camera selected by `settings`.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    let mut source = CameraSource::new(settings)?;
    source.connect()?;
    Ok(Box::new(source))
}

fn device_path(url: &str) -> Option<&str> {
    if let Some(path) = url.strip_prefix("v4l2://") {
        return Some(path);
    }
    url.starts_with("/dev/").then_some(url)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(device: &str, settings: &CameraSettings) -> Result<CameraBackend> {
    Ok(CameraBackend::V4l2(v4l2::V4l2Source::new(
        device,
        settings.width,
        settings.height,
        settings.target_fps,
    )))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(device: &str, _settings: &CameraSettings) -> Result<CameraBackend> {
    Err(anyhow!(
        "camera {} requires the ingest-v4l2 feature",
        device
    ))
}
