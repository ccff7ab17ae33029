//! Container file format structures and primitives.
//!
//! A container is a metadata record followed by any number of self-describing
//! frame records:
//!
//! ```text
//! file            := metadata_record frame_record*
//! metadata_record := lp_string(json(ContainerMetadata))
//! frame_record    := stream_type:i32      (little-endian)
//!                    relative_time_ms:f64 (little-endian)
//!                    payload_size:i64     (little-endian)
//!                    payload:byte[payload_size]
//!                    lp_string("[EOF]")
//! lp_string       := ULEB128 byte count, then that many UTF-8 bytes
//! ```
//!
//! The trailing `"[EOF]"` literal is the per-frame integrity marker: a reader
//! that does not find it directly after the payload re-seeks to
//! `record_start + payload_size` and retries once before declaring the frame
//! corrupt. Payload layouts per stream type live with the channel writers and
//! the replay loader.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::{CaptureError, Result};

/// Version string written by this crate.
pub const CURRENT_VERSION: &str = "2.0";

/// Integrity marker written after every frame payload.
pub const FRAME_END_MARKER: &str = "[EOF]";

/// Container metadata, written once as the first logical record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerMetadata {
    /// Format version. Major version selects the body-payload layout; minor
    /// version 1 files carry legacy maps that readers skip.
    pub version: String,
    /// Identifier of the codec that produced the color payloads.
    pub color_codec_id: i32,
    /// Optional depth-to-camera-space calibration table, row-major `(x, y)`
    /// pairs per depth pixel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_calibration: Option<Vec<f32>>,
}

impl ContainerMetadata {
    pub fn new(color_codec_id: i32) -> Self {
        Self { version: CURRENT_VERSION.to_string(), color_codec_id, depth_calibration: None }
    }

    /// Major version number parsed from the version string.
    pub fn major_version(&self) -> Result<u32> {
        let major = self.version.split('.').next().unwrap_or("");
        major.parse().map_err(|_| {
            CaptureError::parse("metadata", format!("unparseable version '{}'", self.version))
        })
    }

    /// Whether this file uses the legacy body layout (major version 1), which
    /// carries the now-ignored activity/appearance/expression maps.
    pub fn is_legacy_body_layout(&self) -> Result<bool> {
        Ok(self.major_version()? == 1)
    }

    /// Readers accept major versions 1 and 2 only.
    pub fn validate(&self) -> Result<()> {
        match self.major_version()? {
            1 | 2 => Ok(()),
            other => Err(CaptureError::parse(
                "metadata",
                format!("unsupported container version {other} ('{}')", self.version),
            )),
        }
    }

    /// Serialize as the container's first record.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| CaptureError::parse("metadata", format!("serialize failed: {e}")))?;
        write_lp_string(writer, &json)?;
        Ok(())
    }

    /// Parse the container's first record.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let json = read_lp_string(reader)
            .map_err(|e| CaptureError::parse("metadata", format!("unreadable header: {e}")))?;
        let metadata: ContainerMetadata = serde_json::from_str(&json)
            .map_err(|e| CaptureError::parse("metadata", format!("invalid JSON: {e}")))?;
        metadata.validate()?;
        Ok(metadata)
    }
}

/// Write a ULEB128-encoded unsigned integer.
pub fn write_uleb128<W: Write>(writer: &mut W, mut value: u64) -> std::io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            return writer.write_all(&[byte]);
        }
        writer.write_all(&[byte | 0x80])?;
    }
}

/// Read a ULEB128-encoded unsigned integer. Encodings longer than ten bytes
/// cannot fit a u64 and are rejected.
pub fn read_uleb128<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        if shift >= 64 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "ULEB128 value exceeds 64 bits",
            ));
        }
        value |= u64::from(byte[0] & 0x7F) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Write a length-prefixed UTF-8 string.
pub fn write_lp_string<W: Write>(writer: &mut W, value: &str) -> std::io::Result<()> {
    write_uleb128(writer, value.len() as u64)?;
    writer.write_all(value.as_bytes())
}

/// Read a length-prefixed UTF-8 string.
pub fn read_lp_string<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<String> {
    let length = read_uleb128(reader)?;
    let mut buf = vec![0u8; length as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
