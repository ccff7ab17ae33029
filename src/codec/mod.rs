//! Pluggable color codec seam.
//!
//! The color channel is the only one that goes through a codec: raw BGRA
//! passthrough or lossy JPEG, both with an optional deterministic resize. The
//! codec is selected at record time and persisted in the container metadata as
//! a small-integer id, so replay picks the matching decoder without
//! re-negotiation. Encoding is async because the lossy path may be offloaded;
//! decoding is synchronous so lazy frames can materialize from any context.

mod jpeg;
mod raw;

use async_trait::async_trait;

use crate::{CaptureError, Result};

pub use jpeg::JpegColorCodec;
pub use raw::RawColorCodec;

/// Codec id persisted for raw passthrough.
pub const RAW_CODEC_ID: i32 = 0;
/// Codec id persisted for lossy JPEG.
pub const JPEG_CODEC_ID: i32 = 1;

/// Bytes per BGRA pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Result of encoding one color frame.
#[derive(Debug, Clone)]
pub struct EncodedColor {
    pub width: i32,
    pub height: i32,
    pub bytes: Vec<u8>,
}

/// Resize filter applied when the configured output size differs from the
/// source. Both filters are deterministic for a fixed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFilter {
    #[default]
    Nearest,
    Bilinear,
}

/// Output dimensions a codec scales to before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
    pub filter: ResizeFilter,
}

/// Encode/decode strategy for the color channel.
#[async_trait]
pub trait ColorCodec: Send + Sync {
    /// Stable identifier persisted in the container metadata.
    fn codec_id(&self) -> i32;

    /// Encode a BGRA pixel buffer, returning the output dimensions and the
    /// stored bytes.
    async fn encode(&self, pixels: &[u8], width: i32, height: i32) -> Result<EncodedColor>;

    /// Decode stored bytes back into a BGRA pixel buffer.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Resolve the decoder for a persisted codec id. Unknown ids are a structural
/// error: the file cannot be interpreted without the matching codec.
pub fn codec_for_id(id: i32) -> Result<Box<dyn ColorCodec>> {
    match id {
        RAW_CODEC_ID => Ok(Box::new(RawColorCodec::new())),
        JPEG_CODEC_ID => Ok(Box::new(JpegColorCodec::new())),
        other => Err(CaptureError::parse("codec", format!("unknown color codec id {other}"))),
    }
}

/// Record-time codec selection, fixed once recording starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorCodecChoice {
    Raw { resize: Option<Resize> },
    Jpeg { quality: u8, resize: Option<Resize> },
}

impl Default for ColorCodecChoice {
    fn default() -> Self {
        ColorCodecChoice::Raw { resize: None }
    }
}

impl ColorCodecChoice {
    /// The id this choice persists in the container metadata.
    pub fn codec_id(&self) -> i32 {
        match self {
            ColorCodecChoice::Raw { .. } => RAW_CODEC_ID,
            ColorCodecChoice::Jpeg { .. } => JPEG_CODEC_ID,
        }
    }

    /// Build the encoder for this choice.
    pub fn build(&self) -> Box<dyn ColorCodec> {
        match self {
            ColorCodecChoice::Raw { resize } => Box::new(RawColorCodec::with_resize(*resize)),
            ColorCodecChoice::Jpeg { quality, resize } => {
                Box::new(JpegColorCodec::with_options(*quality, *resize))
            }
        }
    }
}

/// Shared input validation: dimensions must be positive and the buffer must
/// hold exactly `width * height` BGRA pixels.
pub(crate) fn validate_input(pixels: &[u8], width: i32, height: i32) -> Result<()> {
    if width <= 0 || height <= 0 {
        return Err(CaptureError::encoding(format!("invalid dimensions {width}x{height}")));
    }
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
        .ok_or_else(|| {
            CaptureError::encoding(format!("dimensions {width}x{height} overflow buffer size"))
        })?;
    if pixels.len() != expected {
        return Err(CaptureError::encoding(format!(
            "pixel buffer holds {} bytes, {width}x{height} BGRA requires {expected}",
            pixels.len()
        )));
    }
    Ok(())
}
