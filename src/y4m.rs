//! YUV4MPEG2 stream reading and writing.
//!
//! Clips are written as 4:4:4 Y4M so that no chroma is lost before the
//! compression step. The reader also accepts 4:2:0 and mono streams, which is
//! what external grabbers usually emit on a pipe.
//!
//! Colour conversion is BT.601 limited range, integer arithmetic.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::io::{BufRead, Read, Write};

const MAGIC: &str = "YUV4MPEG2";
const FRAME_TAG: &[u8] = b"FRAME";
const MAX_HEADER_LEN: usize = 1024;
/// Largest width or height accepted from a stream header.
pub const MAX_DIMENSION: u32 = 16384;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chroma {
    C444,
    C420,
    Mono,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Y4mHeader {
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub chroma: Chroma,
}

impl Y4mHeader {
    /// Bytes of one raw frame, `None` if that does not fit in memory.
    fn frame_len(&self) -> Option<usize> {
        let luma = (self.width as usize).checked_mul(self.height as usize)?;
        match self.chroma {
            Chroma::C444 => luma.checked_mul(3),
            Chroma::C420 => {
                let cw = (self.width as usize).div_ceil(2);
                let ch = (self.height as usize).div_ceil(2);
                cw.checked_mul(ch)?.checked_mul(2)?.checked_add(luma)
            }
            Chroma::Mono => Some(luma),
        }
    }

    fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_ascii_whitespace();
        if tokens.next() != Some(MAGIC) {
            return Err(anyhow!("not a YUV4MPEG2 stream"));
        }
        let mut width = None;
        let mut height = None;
        let mut fps = (25, 1);
        let mut chroma = Chroma::C420;
        for token in tokens {
            let split = token.chars().next().map_or(0, char::len_utf8);
            let (tag, value) = token.split_at(split);
            match tag {
                "W" => width = Some(value.parse::<u32>().context("bad Y4M width")?),
                "H" => height = Some(value.parse::<u32>().context("bad Y4M height")?),
                "F" => {
                    let (num, den) = value
                        .split_once(':')
                        .ok_or_else(|| anyhow!("bad Y4M frame rate {}", value))?;
                    fps = (
                        num.parse().context("bad Y4M frame rate")?,
                        den.parse().context("bad Y4M frame rate")?,
                    );
                }
                "C" => {
                    chroma = if value.starts_with("444") {
                        Chroma::C444
                    } else if value.starts_with("420") {
                        Chroma::C420
                    } else if value.starts_with("mono") {
                        Chroma::Mono
                    } else {
                        return Err(anyhow!("unsupported Y4M colourspace C{}", value));
                    }
                }
                "I" => {
                    if value != "p" && value != "?" {
                        return Err(anyhow!("interlaced Y4M streams are not supported"));
                    }
                }
                _ => {}
            }
        }
        let (width, height) = match (width, height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => return Err(anyhow!("Y4M header is missing frame dimensions")),
        };
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(anyhow!(
                "Y4M frame size {}x{} exceeds the {} pixel limit",
                width,
                height,
                MAX_DIMENSION
            ));
        }
        Ok(Self {
            width,
            height,
            fps_num: fps.0,
            fps_den: fps.1.max(1),
            chroma,
        })
    }
}

// ----------------------------------------------------------------------------
// Colour conversion
// ----------------------------------------------------------------------------

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (y.clamp(0, 255) as u8, u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}

pub(crate) fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    [r.clamp(0, 255) as u8, g.clamp(0, 255) as u8, b.clamp(0, 255) as u8]
}

// ----------------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------------

/// Writes RGB frames as a 4:4:4 Y4M stream.
pub struct Y4mWriter<W: Write> {
    inner: W,
    width: u32,
    height: u32,
    planes: Vec<u8>,
    frames: u64,
}

impl<W: Write> Y4mWriter<W> {
    pub fn new(mut inner: W, width: u32, height: u32, fps: u32) -> Result<Self> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(anyhow!("cannot write {}x{} Y4M frames", width, height));
        }
        writeln!(
            inner,
            "{} W{} H{} F{}:1 Ip A1:1 C444",
            MAGIC,
            width,
            height,
            fps.max(1)
        )
        .context("failed to write Y4M header")?;
        Ok(Self {
            inner,
            width,
            height,
            planes: vec![0; width as usize * height as usize * 3],
            frames: 0,
        })
    }

    pub fn write_frame(&mut self, image: &RgbImage) -> Result<()> {
        if image.width() != self.width || image.height() != self.height {
            return Err(anyhow!(
                "frame is {}x{}, stream is {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            ));
        }
        let plane = self.width as usize * self.height as usize;
        for (i, pixel) in image.pixels().enumerate() {
            let (y, u, v) = rgb_to_yuv(pixel[0], pixel[1], pixel[2]);
            self.planes[i] = y;
            self.planes[plane + i] = u;
            self.planes[2 * plane + i] = v;
        }
        self.inner.write_all(FRAME_TAG)?;
        self.inner.write_all(b"\n")?;
        self.inner.write_all(&self.planes)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn finish(mut self) -> Result<W> {
        self.inner.flush().context("failed to flush Y4M stream")?;
        Ok(self.inner)
    }
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

pub struct Y4mReader<R: BufRead> {
    inner: R,
    header: Y4mHeader,
    raw: Vec<u8>,
}

impl<R: BufRead> Y4mReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let line = read_line(&mut inner)?.ok_or_else(|| anyhow!("empty Y4M stream"))?;
        let header = Y4mHeader::parse(&line)?;
        let len = header
            .frame_len()
            .ok_or_else(|| anyhow!("Y4M frame size {}x{} overflows", header.width, header.height))?;
        let raw = vec![0; len];
        Ok(Self { inner, header, raw })
    }

    pub fn header(&self) -> &Y4mHeader {
        &self.header
    }

    /// Next frame, or `None` at a clean end of stream.
    pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(line) = read_line(&mut self.inner)? else {
            return Ok(None);
        };
        if !line.as_bytes().starts_with(FRAME_TAG) {
            return Err(anyhow!("expected FRAME marker in Y4M stream"));
        }
        self.inner
            .read_exact(&mut self.raw)
            .context("truncated Y4M frame")?;
        Ok(Some(self.convert()))
    }

    fn convert(&self) -> RgbImage {
        let Y4mHeader {
            width,
            height,
            chroma,
            ..
        } = self.header;
        let w = width as usize;
        let plane = w * height as usize;
        let cw = w.div_ceil(2);
        let chroma_plane = cw * (height as usize).div_ceil(2);
        RgbImage::from_fn(width, height, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let luma = self.raw[y * w + x];
            let (u, v) = match chroma {
                Chroma::C444 => (self.raw[plane + y * w + x], self.raw[2 * plane + y * w + x]),
                Chroma::C420 => {
                    let idx = (y / 2) * cw + x / 2;
                    (self.raw[plane + idx], self.raw[plane + chroma_plane + idx])
                }
                Chroma::Mono => (128, 128),
            };
            image::Rgb(yuv_to_rgb(luma, u, v))
        })
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_HEADER_LEN as u64)
        .read_until(b'\n', &mut buf)?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        return Err(anyhow!("unterminated Y4M header line"));
    }
    buf.pop();
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| anyhow!("Y4M header is not ASCII"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn written_clip_reads_back_close_to_source() {
        let image = RgbImage::from_fn(6, 4, |x, _| {
            if x < 3 {
                image::Rgb([220, 20, 60])
            } else {
                image::Rgb([30, 200, 90])
            }
        });
        let mut writer = Y4mWriter::new(Vec::new(), 6, 4, 20).unwrap();
        writer.write_frame(&image).unwrap();
        writer.write_frame(&image).unwrap();
        assert_eq!(writer.frames_written(), 2);
        let bytes = writer.finish().unwrap();

        let mut reader = Y4mReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.header().fps_num, 20);
        assert_eq!(reader.header().chroma, Chroma::C444);
        let first = reader.next_frame().unwrap().unwrap();
        for (a, b) in first.pixels().zip(image.pixels()) {
            for c in 0..3 {
                assert!((a[c] as i32 - b[c] as i32).abs() <= 3, "{:?} vs {:?}", a, b);
            }
        }
        assert!(reader.next_frame().unwrap().is_some());
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn reads_420_stream() {
        let mut bytes = b"YUV4MPEG2 W2 H2 F10:1 Ip C420jpeg\nFRAME\n".to_vec();
        bytes.extend_from_slice(&[235, 235, 235, 235, 128, 128]);
        let mut reader = Y4mReader::new(Cursor::new(bytes)).unwrap();
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.get_pixel(1, 1), &image::Rgb([255, 255, 255]));
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut writer = Y4mWriter::new(Vec::new(), 4, 4, 20).unwrap();
        assert!(writer.write_frame(&RgbImage::new(2, 2)).is_err());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let bytes = b"YUV4MPEG2 W2 H2 F10:1 C444\nFRAME\n\x10\x10".to_vec();
        let mut reader = Y4mReader::new(Cursor::new(bytes)).unwrap();
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn oversized_header_is_rejected_without_allocating() {
        let bytes = b"YUV4MPEG2 W4294967295 H4294967295 C444\nFRAME\n".to_vec();
        let err = Y4mReader::new(Cursor::new(bytes)).err().unwrap();
        assert!(err.to_string().contains("exceeds"), "{err:#}");

        let bytes = b"YUV4MPEG2 W16385 H2 C420\n".to_vec();
        assert!(Y4mReader::new(Cursor::new(bytes)).is_err());
    }

    #[test]
    fn largest_accepted_frame_length_is_exact() {
        let header = Y4mHeader::parse("YUV4MPEG2 W16384 H16384 C420").unwrap();
        assert_eq!(header.frame_len(), Some(16384 * 16384 + 2 * 8192 * 8192));
    }
}
