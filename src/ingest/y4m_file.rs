//! Y4M file and pipe source.
//!
//! `path/to/clip.y4m` reads a recorded stream; `-` reads a live stream from
//! stdin (for example an external grabber writing `yuv4mpegpipe`).

use anyhow::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};

use super::{FrameSource, SourceStats};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::y4m::Y4mReader;

pub struct Y4mSource {
    name: String,
    reader: Option<Y4mReader<Box<dyn BufRead + Send>>>,
    frame_count: u64,
    read_failures: u64,
}

impl Y4mSource {
    pub fn open(path: &str) -> Result<Self> {
        let input: Box<dyn BufRead + Send> = if path == "-" {
            Box::new(BufReader::new(std::io::stdin()))
        } else {
            let file = File::open(path)
                .map_err(|e| PipelineError::source_unavailable(path, e))?;
            Box::new(BufReader::new(file))
        };
        Self::from_reader(path, input)
    }

    pub fn from_reader(name: &str, input: Box<dyn BufRead + Send>) -> Result<Self> {
        let reader = Y4mReader::new(input).map_err(|e| PipelineError::source_unavailable(name, e))?;
        let header = reader.header();
        log::info!(
            "Y4mSource: opened {} ({}x{} @ {}/{} fps)",
            name,
            header.width,
            header.height,
            header.fps_num,
            header.fps_den
        );
        Ok(Self {
            name: name.to_string(),
            reader: Some(reader),
            frame_count: 0,
            read_failures: 0,
        })
    }
}

impl FrameSource for Y4mSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Frame> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(PipelineError::read_failure(&self.name, "source closed"));
        };
        match reader.next_frame() {
            Ok(Some(image)) => {
                let frame = Frame::new(image, self.frame_count);
                self.frame_count += 1;
                Ok(frame)
            }
            Ok(None) => Err(PipelineError::end_of_stream(&self.name)),
            // A damaged stream cannot resynchronise on frame boundaries.
            Err(e) => {
                self.read_failures += 1;
                log::warn!("Y4mSource: {} unreadable, ending stream: {:#}", self.name, e);
                self.reader = None;
                Err(PipelineError::end_of_stream(&self.name))
            }
        }
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            log::info!("Y4mSource: closed {}", self.name);
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
    use crate::error::{is_end_of_stream, is_source_unavailable};
    use crate::y4m::Y4mWriter;
    use image::RgbImage;
    use std::io::Cursor;

    fn stream(frames: usize) -> Vec<u8> {
        let mut writer = Y4mWriter::new(Vec::new(), 4, 2, 20).unwrap();
        for _ in 0..frames {
            writer.write_frame(&RgbImage::new(4, 2)).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn reads_frames_then_end_of_stream() {
        let mut source =
            Y4mSource::from_reader("mem", Box::new(Cursor::new(stream(2)))).unwrap();
        assert_eq!(source.read().unwrap().sequence(), 0);
        assert_eq!(source.read().unwrap().sequence(), 1);
        assert!(is_end_of_stream(&source.read().unwrap_err()));
        assert_eq!(source.stats().frames_captured, 2);
    }

    #[test]
    fn garbage_header_is_unavailable() {
        let err = Y4mSource::from_reader("mem", Box::new(Cursor::new(b"nope\n".to_vec())))
            .err()
            .unwrap();
        assert!(is_source_unavailable(&err));
    }

    #[test]
    fn absurd_frame_size_is_unavailable_not_a_panic() {
        let header = b"YUV4MPEG2 W4294967295 H4294967295 C444\n".to_vec();
        let err = Y4mSource::from_reader("huge", Box::new(Cursor::new(header)))
            .err()
            .unwrap();
        assert!(is_source_unavailable(&err));
    }
}
