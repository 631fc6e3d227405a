use anyhow::{anyhow, Context, Result};
use rand::Rng;
use url::Url;

use super::SourceStats;
use crate::frame::{rgb_len, RawFrame};
use crate::pace::Pacer;

/// Generated noise frames for `stub://` URLs.
///
/// `stub://name?frames=N` ends the stream after N frames; without it the source never ends.
pub(crate) struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    pacer: Pacer,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub(crate) fn new(url: &str, width: u32, height: u32, target_fps: u32) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parse stub url {}", url))?;
        let mut frame_limit = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "frames" => {
                    let limit = value
                        .parse()
                        .map_err(|_| anyhow!("stub frames must be an integer, got '{}'", value))?;
                    frame_limit = Some(limit);
                }
                other => return Err(anyhow!("unknown stub url parameter '{}'", other)),
            }
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("stub resolution must be non-zero"));
        }
        rgb_len(width, height)?;
        Ok(Self {
            url: url.to_string(),
            width,
            height,
            frame_limit,
            pacer: Pacer::from_fps(target_fps),
            frame_count: 0,
            connected: false,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "synthetic camera {} ({}x{})",
            self.url,
            self.width,
            self.height
        );
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if let Some(limit) = self.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.pacer.wait();

        let mut pixels = vec![0u8; rgb_len(self.width, self.height)?];
        rand::thread_rng().fill(&mut pixels[..]);
        self.frame_count += 1;
        RawFrame::new(pixels, self.width, self.height, self.frame_count).map(Some)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.connected
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}
