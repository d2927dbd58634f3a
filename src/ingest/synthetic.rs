//! Synthetic `stub://` source.
//!
//! Renders a static background with a single marker-coloured block that moves
//! down and back up through the scene, so the block's bottom edge crosses any
//! boundary row inside the frame twice per cycle. Query parameters:
//!
//! - `width`, `height`: frame size (default 500x720)
//! - `period`: frames for one top-to-bottom pass (default 60)
//! - `noise`: per-pixel sensor noise amplitude (default 0)
//! - `fail_every`: every Nth read fails transiently (default 0 = never)
//! - `frames`: end of stream after N frames (default 0 = endless)

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use rand::Rng;

use super::{FrameSource, SourceStats};
use crate::error::PipelineError;
use crate::frame::Frame;

/// Block colour; matches the marker backend's default.
pub const SYNTHETIC_MARKER: [u8; 3] = [220, 20, 60];

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub period: u32,
    pub noise: u8,
    pub fail_every: u64,
    pub max_frames: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera0".to_string(),
            width: 500,
            height: 720,
            period: 60,
            noise: 0,
            fail_every: 0,
            max_frames: 0,
        }
    }
}

impl SyntheticConfig {
    pub fn from_url(url: &str) -> Result<Self> {
        let mut config = Self {
            url: url.to_string(),
            ..Self::default()
        };
        let Some((_, query)) = url.split_once('?') else {
            return Ok(config);
        };
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
            let bad = |_| anyhow!("stub parameter {} must be a number", key);
            match key {
                "width" => config.width = value.parse().map_err(bad)?,
                "height" => config.height = value.parse().map_err(bad)?,
                "period" => config.period = value.parse().map_err(bad)?,
                "noise" => config.noise = value.parse().map_err(bad)?,
                "fail_every" => config.fail_every = value.parse().map_err(bad)?,
                "frames" => config.max_frames = value.parse().map_err(bad)?,
                _ => log::warn!("SyntheticSource: ignoring unknown parameter {}", key),
            }
        }
        if config.width < 8 || config.height < 8 {
            return Err(PipelineError::source_unavailable(
                url,
                "synthetic frames must be at least 8x8",
            ));
        }
        config.period = config.period.max(1);
        Ok(config)
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    background: RgbImage,
    frame_count: u64,
    read_attempts: u64,
    read_failures: u64,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let background = RgbImage::from_fn(config.width, config.height, |x, y| {
            let shade = 70 + ((x / 16 + y / 16) % 2) as u8 * 20;
            Rgb([shade, shade, shade.saturating_add(10)])
        });
        log::info!("SyntheticSource: connected to {}", config.url);
        Self {
            config,
            background,
            frame_count: 0,
            read_attempts: 0,
            read_failures: 0,
            closed: false,
        }
    }

    /// Block geometry for the frame about to be produced: (x, y, w, h).
    fn block_at(&self, index: u64) -> (u32, u32, u32, u32) {
        let w = (self.config.width / 8).max(2);
        let h = (self.config.height / 6).max(2);
        let x = self.config.width / 2 - w / 2;
        let travel = (self.config.height - h) as u64;
        let period = self.config.period as u64;
        let phase = index % (2 * period);
        let offset = if phase < period {
            phase * travel / period
        } else {
            (2 * period - phase) * travel / period
        };
        (x, offset as u32, w, h)
    }

    fn render(&self, index: u64) -> RgbImage {
        let mut image = self.background.clone();
        let (bx, by, bw, bh) = self.block_at(index);
        for y in by..(by + bh).min(self.config.height) {
            for x in bx..(bx + bw).min(self.config.width) {
                image.put_pixel(x, y, Rgb(SYNTHETIC_MARKER));
            }
        }
        if self.config.noise > 0 {
            let amplitude = self.config.noise as i16;
            let mut rng = rand::thread_rng();
            for pixel in image.pixels_mut() {
                for channel in pixel.0.iter_mut() {
                    let jitter = rng.gen_range(-amplitude..=amplitude);
                    *channel = (*channel as i16 + jitter).clamp(0, 255) as u8;
                }
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn read(&mut self) -> Result<Frame> {
        if self.closed {
            return Err(PipelineError::read_failure(&self.config.url, "source closed"));
        }
        if self.config.max_frames > 0 && self.frame_count >= self.config.max_frames {
            return Err(PipelineError::end_of_stream(&self.config.url));
        }
        self.read_attempts += 1;
        if self.config.fail_every > 0 && self.read_attempts % self.config.fail_every == 0 {
            self.read_failures += 1;
            return Err(PipelineError::read_failure(
                &self.config.url,
                "synthetic dropped frame",
            ));
        }
        let image = self.render(self.frame_count);
        let frame = Frame::new(image, self.frame_count);
        self.frame_count += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        if !self.closed {
            log::info!("SyntheticSource: closed {}", self.config.url);
            self.closed = true;
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            read_failures: self.read_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_end_of_stream;

    #[test]
    fn parses_query_parameters() {
        let cfg = SyntheticConfig::from_url("stub://a?width=64&height=96&period=10&frames=3")
            .unwrap();
        assert_eq!((cfg.width, cfg.height, cfg.period, cfg.max_frames), (64, 96, 10, 3));
        assert!(SyntheticConfig::from_url("stub://a?width=abc").is_err());
    }

    #[test]
    fn block_moves_down_then_up() {
        let source = SyntheticSource::new(
            SyntheticConfig::from_url("stub://a?width=80&height=120&period=10").unwrap(),
        );
        let (_, top, _, _) = source.block_at(0);
        let (_, bottom, _, h) = source.block_at(10);
        let (_, back, _, _) = source.block_at(20);
        assert_eq!(top, 0);
        assert_eq!(bottom + h, 120);
        assert_eq!(back, 0);
    }

    #[test]
    fn sequences_increase_and_stream_ends() {
        let mut source =
            SyntheticSource::new(SyntheticConfig::from_url("stub://a?width=16&height=16&frames=2").unwrap());
        assert_eq!(source.read().unwrap().sequence(), 0);
        assert_eq!(source.read().unwrap().sequence(), 1);
        assert!(is_end_of_stream(&source.read().unwrap_err()));
    }

    #[test]
    fn injected_failures_skip_without_consuming_sequence() {
        let mut source = SyntheticSource::new(
            SyntheticConfig::from_url("stub://a?width=16&height=16&fail_every=2").unwrap(),
        );
        assert_eq!(source.read().unwrap().sequence(), 0);
        assert!(source.read().is_err());
        assert_eq!(source.read().unwrap().sequence(), 1);
        assert_eq!(source.stats().read_failures, 1);
    }
}
