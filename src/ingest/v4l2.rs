//! V4L2 camera source.
//!
//! Reads a local capture device (`/dev/video0`, or the bare index `0`) through
//! libv4l memory-mapped buffers. The device is asked for packed RGB; drivers
//! that refuse it and stay on YUYV are converted here. Optional query
//! parameters: `width`, `height`, `fps`.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{FrameSource, SourceStats};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::y4m::yuv_to_rgb;

const STREAM_BUFFERS: u32 = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct V4l2Config {
    /// Device node, e.g. `/dev/video0`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Requested capture rate; 0 leaves the driver default.
    pub target_fps: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            target_fps: 0,
        }
    }
}

impl V4l2Config {
    /// `device` is the already resolved node; `source_id` may carry a query.
    pub fn from_source_id(device: &str, source_id: &str) -> Result<Self> {
        let mut config = Self {
            device: device.to_string(),
            ..Self::default()
        };
        let Some((_, query)) = source_id.split_once('?') else {
            return Ok(config);
        };
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed device parameter '{}'", pair))?;
            let bad = |_| anyhow!("device parameter {} must be a number", key);
            match key {
                "width" => config.width = value.parse().map_err(bad)?,
                "height" => config.height = value.parse().map_err(bad)?,
                "fps" => config.target_fps = value.parse().map_err(bad)?,
                _ => log::warn!("V4l2Source: ignoring unknown parameter {}", key),
            }
        }
        Ok(config)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelLayout {
    Rgb24,
    Yuyv,
}

#[self_referencing]
struct DeviceStream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    name: String,
    config: V4l2Config,
    state: Option<DeviceStream>,
    layout: PixelLayout,
    width: u32,
    height: u32,
    frame_count: u64,
    read_failures: u64,
}

impl V4l2Source {
    /// Open and start streaming. Any failure is `SourceUnavailable`.
    pub fn open(name: &str, config: V4l2Config) -> Result<Self> {
        Self::connect(name, config)
            .map_err(|e| PipelineError::source_unavailable(name, format!("{:#}", e)))
    }

    fn connect(name: &str, config: V4l2Config) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", config.device, err);
                device.format().context("read v4l2 format after set failure")?
            }
        };
        let layout = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelLayout::Rgb24
        } else if format.fourcc == v4l::FourCC::new(b"YUYV") {
            PixelLayout::Yuyv
        } else {
            return Err(anyhow!("unsupported pixel format {}", format.fourcc));
        };

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", config.device, err);
            }
        }

        let state = DeviceStreamTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            config.device,
            format.width,
            format.height,
            layout
        );
        Ok(Self {
            name: name.to_string(),
            width: format.width,
            height: format.height,
            config,
            state: Some(state),
            layout,
            frame_count: 0,
            read_failures: 0,
        })
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Err(PipelineError::read_failure(&self.name, "device closed"));
        };
        let (width, height, layout) = (self.width, self.height, self.layout);
        let converted = state.with_stream_mut(|stream| match stream.next() {
            Ok((buf, _meta)) => to_rgb(buf, width, height, layout),
            Err(err) => Err(anyhow::Error::new(err).context("capture v4l2 frame")),
        });
        match converted.and_then(|rgb| Frame::from_rgb(width, height, rgb, self.frame_count)) {
            Ok(frame) => {
                self.frame_count += 1;
                Ok(frame)
            }
            Err(e) => {
                self.read_failures += 1;
                Err(PipelineError::read_failure(&self.name, format!("{:#}", e)))
            }
        }
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: closed {}", self.config.device);
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            read_failures: self.read_failures,
        }
    }
}

/// Packed RGB bytes from one driver buffer.
fn to_rgb(buf: &[u8], width: u32, height: u32, layout: PixelLayout) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    match layout {
        PixelLayout::Rgb24 => buf
            .get(..pixels * 3)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| anyhow!("short RGB buffer: {} bytes", buf.len())),
        PixelLayout::Yuyv => {
            let packed = buf
                .get(..pixels * 2)
                .ok_or_else(|| anyhow!("short YUYV buffer: {} bytes", buf.len()))?;
            let mut rgb = Vec::with_capacity(pixels * 3);
            for quad in packed.chunks_exact(4) {
                let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
                rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
                rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
            Ok(rgb)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_overrides_capture_size() {
        let config =
            V4l2Config::from_source_id("/dev/video2", "/dev/video2?width=1280&height=720&fps=15")
                .unwrap();
        assert_eq!(config.device, "/dev/video2");
        assert_eq!((config.width, config.height, config.target_fps), (1280, 720, 15));
        assert!(V4l2Config::from_source_id("/dev/video0", "0?width=wide").is_err());
    }

    #[test]
    fn yuyv_pairs_share_chroma() {
        // two grey pixels, then black and white
        let buf = [126, 128, 126, 128, 16, 128, 235, 128];
        let rgb = to_rgb(&buf, 2, 2, PixelLayout::Yuyv).unwrap();
        assert_eq!(rgb.len(), 12);
        assert_eq!(&rgb[6..9], &[0, 0, 0]);
        assert_eq!(&rgb[9..12], &[255, 255, 255]);
        assert!(to_rgb(&buf[..4], 2, 2, PixelLayout::Yuyv).is_err());
    }

    #[test]
    fn missing_device_is_unavailable() {
        let config = V4l2Config::from_source_id("/dev/video-none", "/dev/video-none").unwrap();
        let err = V4l2Source::open("/dev/video-none", config).err().unwrap();
        assert!(crate::error::is_source_unavailable(&err));
    }
}
