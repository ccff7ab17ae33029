//! Lossy JPEG codec for the color channel.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat, ImageReader, RgbImage};

use crate::{CaptureError, Result};

use super::{BYTES_PER_PIXEL, ColorCodec, EncodedColor, JPEG_CODEC_ID, Resize};

const DEFAULT_QUALITY: u8 = 70;

/// JPEG compression with configurable quality and optional output resize.
///
/// Alpha does not survive the trip: pixels are flattened to RGB before
/// encoding and reconstituted as opaque BGRA on decode. The lossy path is
/// explicitly not expected to round-trip byte-for-byte.
#[derive(Debug)]
pub struct JpegColorCodec {
    quality: u8,
    resize: Option<Resize>,
}

impl Default for JpegColorCodec {
    fn default() -> Self {
        Self { quality: DEFAULT_QUALITY, resize: None }
    }
}

impl JpegColorCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quality is clamped to 1..=100.
    pub fn with_options(quality: u8, resize: Option<Resize>) -> Self {
        Self { quality: quality.clamp(1, 100), resize }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

#[async_trait]
impl ColorCodec for JpegColorCodec {
    fn codec_id(&self) -> i32 {
        JPEG_CODEC_ID
    }

    async fn encode(&self, pixels: &[u8], width: i32, height: i32) -> Result<EncodedColor> {
        super::validate_input(pixels, width, height)?;

        let (bgra, out_width, out_height) = match self.resize {
            Some(resize) if (resize.width, resize.height) != (width as u32, height as u32) => {
                let scaled = super::raw::resize_bgra(pixels, width as u32, height as u32, resize)?;
                (scaled, resize.width, resize.height)
            }
            _ => (pixels.to_vec(), width as u32, height as u32),
        };

        let rgb = bgra_to_rgb(&bgra);
        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, self.quality);
        encoder
            .encode(&rgb, out_width, out_height, ExtendedColorType::Rgb8)
            .map_err(|e| CaptureError::encoding(format!("JPEG encode failed: {e}")))?;

        Ok(EncodedColor { width: out_width as i32, height: out_height as i32, bytes })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut reader = ImageReader::new(std::io::Cursor::new(bytes));
        reader.set_format(ImageFormat::Jpeg);
        let decoded = reader
            .decode()
            .map_err(|e| CaptureError::corrupt_payload(format!("JPEG decode failed: {e}")))?;
        Ok(rgb_to_bgra(&decoded.to_rgb8()))
    }
}

fn bgra_to_rgb(bgra: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(bgra.len() / BYTES_PER_PIXEL * 3);
    for px in bgra.chunks_exact(BYTES_PER_PIXEL) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}

fn rgb_to_bgra(image: &RgbImage) -> Vec<u8> {
    let mut bgra = Vec::with_capacity(image.as_raw().len() / 3 * BYTES_PER_PIXEL);
    for px in image.as_raw().chunks_exact(3) {
        bgra.extend_from_slice(&[px[2], px[1], px[0], 0xFF]);
    }
    bgra
}
