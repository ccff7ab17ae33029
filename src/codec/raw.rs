//! Raw passthrough codec for the color channel.

use async_trait::async_trait;
use image::RgbaImage;
use image::imageops::{self, FilterType};

use crate::{CaptureError, Result};

use super::{BYTES_PER_PIXEL, ColorCodec, EncodedColor, RAW_CODEC_ID, Resize, ResizeFilter};

/// Identity codec: stored bytes are the BGRA pixels themselves.
///
/// With a resize configured the pixels are rescaled before storage; the
/// resize is deterministic, so the raw path round-trips byte-identically
/// whenever output dimensions match the source.
#[derive(Debug, Default)]
pub struct RawColorCodec {
    resize: Option<Resize>,
}

impl RawColorCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resize(resize: Option<Resize>) -> Self {
        Self { resize }
    }
}

#[async_trait]
impl ColorCodec for RawColorCodec {
    fn codec_id(&self) -> i32 {
        RAW_CODEC_ID
    }

    async fn encode(&self, pixels: &[u8], width: i32, height: i32) -> Result<EncodedColor> {
        super::validate_input(pixels, width, height)?;

        match self.resize {
            Some(resize) if (resize.width, resize.height) != (width as u32, height as u32) => {
                let scaled = resize_bgra(pixels, width as u32, height as u32, resize)?;
                Ok(EncodedColor {
                    width: resize.width as i32,
                    height: resize.height as i32,
                    bytes: scaled,
                })
            }
            _ => Ok(EncodedColor { width, height, bytes: pixels.to_vec() }),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() % BYTES_PER_PIXEL != 0 {
            return Err(CaptureError::corrupt_payload(format!(
                "raw color payload of {} bytes is not a whole number of BGRA pixels",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }
}

/// Rescale a BGRA buffer. Channel order is irrelevant to the sampling math,
/// so the buffer is handled as a four-channel image directly.
pub(super) fn resize_bgra(
    pixels: &[u8],
    width: u32,
    height: u32,
    resize: Resize,
) -> Result<Vec<u8>> {
    if resize.width == 0 || resize.height == 0 {
        return Err(CaptureError::encoding(format!(
            "invalid resize target {}x{}",
            resize.width, resize.height
        )));
    }
    let image = RgbaImage::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
        CaptureError::encoding(format!("pixel buffer does not match {width}x{height}"))
    })?;
    let filter = match resize.filter {
        ResizeFilter::Nearest => FilterType::Nearest,
        ResizeFilter::Bilinear => FilterType::Triangle,
    };
    let scaled = imageops::resize(&image, resize.width, resize.height, filter);
    Ok(scaled.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: usize, height: usize) -> Vec<u8> {
        (0..width * height * BYTES_PER_PIXEL).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn passthrough_round_trips_byte_identically() {
        let codec = RawColorCodec::new();
        let pixels = gradient(4, 4);

        let encoded = codec.encode(&pixels, 4, 4).await.unwrap();
        assert_eq!(encoded.width, 4);
        assert_eq!(encoded.height, 4);

        let decoded = codec.decode(&encoded.bytes).unwrap();
        assert_eq!(decoded, pixels);
    }

    #[tokio::test]
    async fn resize_changes_output_dimensions_deterministically() {
        let resize = Some(Resize { width: 2, height: 2, filter: ResizeFilter::Nearest });
        let codec = RawColorCodec::with_resize(resize);
        let pixels = gradient(4, 4);

        let first = codec.encode(&pixels, 4, 4).await.unwrap();
        let second = codec.encode(&pixels, 4, 4).await.unwrap();

        assert_eq!(first.width, 2);
        assert_eq!(first.height, 2);
        assert_eq!(first.bytes.len(), 2 * 2 * BYTES_PER_PIXEL);
        assert_eq!(first.bytes, second.bytes);
    }

    #[tokio::test]
    async fn matching_resize_target_is_passthrough() {
        let resize = Some(Resize { width: 4, height: 4, filter: ResizeFilter::Bilinear });
        let codec = RawColorCodec::with_resize(resize);
        let pixels = gradient(4, 4);

        let encoded = codec.encode(&pixels, 4, 4).await.unwrap();
        assert_eq!(encoded.bytes, pixels);
    }

    #[tokio::test]
    async fn malformed_dimensions_fail_encoding() {
        let codec = RawColorCodec::new();
        let err = codec.encode(&[0u8; 16], 3, 2).await.unwrap_err();
        assert!(matches!(err, CaptureError::Encoding { .. }));

        let err = codec.encode(&[0u8; 16], 0, 0).await.unwrap_err();
        assert!(matches!(err, CaptureError::Encoding { .. }));
    }

    #[test]
    fn ragged_payload_fails_decoding() {
        let codec = RawColorCodec::new();
        let err = codec.decode(&[0u8; 7]).unwrap_err();
        assert!(matches!(err, CaptureError::CorruptPayload { .. }));
    }
}
