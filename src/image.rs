// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::error::{CaptureError, Result};
use core::fmt;
use image::ImageEncoder;
use std::{borrow::Cow, io::Cursor};

/// Pixel formats produced by the sensor pipeline.
///
/// The capture core only interprets the format for size accounting and for
/// the raw-vs-compressed distinction on the preview path; pixel content is
/// opaque to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit grayscale
    Grayscale,
    /// RGB 5:6:5 packed, 16 bits per pixel, little-endian
    Rgb565,
    /// Raw Bayer mosaic, 8 bits per pixel
    Bayer,
    /// YUYV 4:2:2 packed (common camera output format)
    Yuyv,
    /// JPEG compressed
    Jpeg,
}

impl PixelFormat {
    /// Returns true for formats holding an encoded bitstream rather than
    /// addressable pixels.
    pub const fn is_compressed(self) -> bool {
        matches!(self, PixelFormat::Jpeg)
    }

    /// Number of bytes one frame occupies at the given geometry.
    ///
    /// Compressed frames are budgeted at 2 bytes per pixel, the same bound
    /// as YUYV; encoded output beyond that is reported through the overflow
    /// flags instead of growing the slot.
    pub const fn frame_bytes(self, width: u32, height: u32) -> usize {
        let px = width as usize * height as usize;
        match self {
            PixelFormat::Grayscale | PixelFormat::Bayer => px,
            PixelFormat::Rgb565 | PixelFormat::Yuyv | PixelFormat::Jpeg => 2 * px,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PixelFormat::Grayscale => "GRAY",
            PixelFormat::Rgb565 => "RGB565",
            PixelFormat::Bayer => "BAYER",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Jpeg => "JPEG",
        };
        write!(f, "{name}")
    }
}

/// Borrowed view of one image: geometry, pixel format, and the raw bytes.
///
/// This is the descriptor exchanged with the sensor driver and the image
/// processing stages. It does not own the pixel data; a framebuffer slot or
/// any caller-provided buffer can back it.
#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: &'a [u8],
}

impl<'a> ImageView<'a> {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: &'a [u8]) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Byte size of the view (the actual payload, which for compressed
    /// sources may be well below the format's frame budget).
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Display for ImageView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{} {} {} bytes",
            self.width,
            self.height,
            self.format,
            self.data.len()
        )
    }
}

/// Contract for the JPEG encoder collaborator.
///
/// `encode` compresses `src` at the given quality into `out` and returns the
/// encoded byte count. An output buffer too small for the result fails with
/// [`CaptureError::EncodeOverflow`]; any other encoder problem maps to
/// [`CaptureError::Encode`].
pub trait PreviewEncoder {
    fn encode(&self, src: &ImageView, quality: u8, out: &mut [u8]) -> Result<usize>;
}

/// Contract for the host debug transport.
///
/// `stream_frame` is fire-and-forget; the capture core does not depend on a
/// return value.
pub trait HostTransport {
    fn stream_frame(&self, frame: &[u8]);
}

/// Transport that drops every frame. Used when no host is attached.
pub struct DiscardTransport;

impl HostTransport for DiscardTransport {
    fn stream_frame(&self, _frame: &[u8]) {}
}

/// Software JPEG encoder for the preview channel.
///
/// Raw sensor formats are expanded to 8-bit gray or RGB before compression.
/// Bayer sources are encoded as grayscale; the preview path does not
/// demosaic.
///
/// # Example
///
/// ```
/// use edgefirst_capture::image::{ImageView, JpegEncoder, PixelFormat, PreviewEncoder};
///
/// # fn main() -> edgefirst_capture::Result<()> {
/// let pixels = vec![0x40u8; 64 * 64];
/// let src = ImageView::new(64, 64, PixelFormat::Grayscale, &pixels);
/// let mut out = vec![0u8; 16 * 1024];
/// let size = JpegEncoder.encode(&src, 80, &mut out)?;
/// assert!(size > 0);
/// # Ok(())
/// # }
/// ```
pub struct JpegEncoder;

impl PreviewEncoder for JpegEncoder {
    fn encode(&self, src: &ImageView, quality: u8, out: &mut [u8]) -> Result<usize> {
        let capacity = out.len();
        let (pixels, color) = expand_pixels(src)?;

        let mut cursor = Cursor::new(out);
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
        encoder
            .write_image(&pixels, src.width(), src.height(), color)
            .map_err(|err| match err {
                image::ImageError::IoError(io) if io.kind() == std::io::ErrorKind::WriteZero => {
                    CaptureError::EncodeOverflow { capacity }
                }
                other => CaptureError::Encode(other.to_string()),
            })?;
        Ok(cursor.position() as usize)
    }
}

/// Expands a raw source into bytes the JPEG encoder accepts.
fn expand_pixels<'a>(src: &ImageView<'a>) -> Result<(Cow<'a, [u8]>, image::ExtendedColorType)> {
    let px = src.width() as usize * src.height() as usize;
    let expected = src.format().frame_bytes(src.width(), src.height());
    if src.data().len() < expected {
        return Err(CaptureError::Encode(format!(
            "source too short: {} bytes for {}x{} {}",
            src.data().len(),
            src.width(),
            src.height(),
            src.format()
        )));
    }
    match src.format() {
        PixelFormat::Grayscale | PixelFormat::Bayer => Ok((
            Cow::Borrowed(&src.data()[..px]),
            image::ExtendedColorType::L8,
        )),
        PixelFormat::Rgb565 => Ok((
            Cow::Owned(rgb565_to_rgb888(src.data(), px)),
            image::ExtendedColorType::Rgb8,
        )),
        PixelFormat::Yuyv => Ok((
            Cow::Owned(yuyv_to_rgb888(src.data(), px)),
            image::ExtendedColorType::Rgb8,
        )),
        PixelFormat::Jpeg => Err(CaptureError::Encode(
            "source is already compressed".to_string(),
        )),
    }
}

fn rgb565_to_rgb888(data: &[u8], px: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(px * 3);
    for pair in data.chunks_exact(2).take(px) {
        let v = u16::from_le_bytes([pair[0], pair[1]]);
        let r = ((v >> 11) & 0x1f) as u8;
        let g = ((v >> 5) & 0x3f) as u8;
        let b = (v & 0x1f) as u8;
        out.push(r << 3 | r >> 2);
        out.push(g << 2 | g >> 4);
        out.push(b << 3 | b >> 2);
    }
    out
}

fn yuyv_to_rgb888(data: &[u8], px: usize) -> Vec<u8> {
    fn clamp(v: i32) -> u8 {
        v.clamp(0, 255) as u8
    }
    // BT.601 integer approximation.
    fn convert(y: i32, d: i32, e: i32, out: &mut Vec<u8>) {
        let c = 298 * (y - 16);
        out.push(clamp((c + 409 * e + 128) >> 8));
        out.push(clamp((c - 100 * d - 208 * e + 128) >> 8));
        out.push(clamp((c + 516 * d + 128) >> 8));
    }

    let mut out = Vec::with_capacity(px * 3);
    for quad in data.chunks_exact(4).take(px / 2) {
        let d = quad[1] as i32 - 128;
        let e = quad[3] as i32 - 128;
        convert(quad[0] as i32, d, e, &mut out);
        convert(quad[2] as i32, d, e, &mut out);
    }
    out
}
