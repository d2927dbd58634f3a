//! Container file and network stream source decoded by FFmpeg.
//!
//! Handles anything libavformat opens that the built-in Y4M reader does not:
//! `.mp4`/`.mkv`/`.avi` recordings and `rtsp://` or `http(s)://` camera
//! streams. Frames are converted to RGB24 as they are decoded.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::{FrameSource, SourceStats};
use crate::error::PipelineError;
use crate::frame::Frame;

pub struct FfmpegSource {
    name: String,
    input: Option<ffmpeg::format::context::Input>,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    flushed: bool,
    frame_count: u64,
    read_failures: u64,
}

impl FfmpegSource {
    /// Open the input and its best video stream. Any failure is `SourceUnavailable`.
    pub fn open(location: &str) -> Result<Self> {
        Self::connect(location)
            .map_err(|e| PipelineError::source_unavailable(location, format!("{:#}", e)))
    }

    fn connect(location: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&location)
            .with_context(|| format!("failed to open '{}' with ffmpeg", location))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("input has no video track"))?;
        let stream_index = stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        log::info!(
            "FfmpegSource: opened {} ({}x{})",
            location,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            name: location.to_string(),
            input: Some(input),
            stream_index,
            decoder,
            flushed: false,
            frame_count: 0,
            read_failures: 0,
        })
    }

    /// Next decoded picture, `None` once the decoder is drained.
    fn decode_next(&mut self) -> Result<Option<ffmpeg::frame::Video>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(decoded));
            }
            if self.flushed {
                return Ok(None);
            }
            let input = self
                .input
                .as_mut()
                .ok_or_else(|| anyhow!("source closed"))?;
            match input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        self.decoder
                            .send_packet(&packet)
                            .context("send packet to ffmpeg decoder")?;
                    }
                }
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.flushed = true;
                }
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Frame> {
        if self.input.is_none() {
            return Err(PipelineError::read_failure(&self.name, "source closed"));
        }
        let converted = self.decode_next().and_then(|decoded| match decoded {
            Some(decoded) => to_frame(&decoded, self.frame_count).map(Some),
            None => Ok(None),
        });
        match converted {
            Ok(Some(frame)) => {
                self.frame_count += 1;
                Ok(frame)
            }
            Ok(None) => Err(PipelineError::end_of_stream(&self.name)),
            Err(e) => {
                self.read_failures += 1;
                Err(PipelineError::read_failure(&self.name, format!("{:#}", e)))
            }
        }
    }

    fn close(&mut self) {
        if self.input.take().is_some() {
            log::info!("FfmpegSource: closed {}", self.name);
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            read_failures: self.read_failures,
        }
    }
}

fn to_frame(decoded: &ffmpeg::frame::Video, sequence: u64) -> Result<Frame> {
    let mut rgb = ffmpeg::frame::Video::empty();
    decoded
        .converter(ffmpeg::util::format::pixel::Pixel::RGB24)
        .context("create ffmpeg scaler")?
        .run(decoded, &mut rgb)
        .context("scale frame to RGB")?;

    let (width, height) = (rgb.width(), rgb.height());
    let row_bytes = width as usize * 3;
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Frame::from_rgb(width, height, pixels, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_source_unavailable;

    #[test]
    fn missing_file_is_unavailable() {
        let err = FfmpegSource::open("/nonexistent/lobby.mp4").err().unwrap();
        assert!(is_source_unavailable(&err));
    }
}
