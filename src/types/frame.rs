//! Frame records for the four sensor channels.
//!
//! [`FrameRecord`] is the fundamental data unit that flows through the system:
//! a relative timestamp plus a closed [`FramePayload`] sum over the color,
//! depth, body, and infrared channels. Encode/decode dispatch is an exhaustive
//! match on the payload, not an extensible plugin point.
//!
//! Pixel-bearing payloads hold their bytes through [`PixelData`]: either an
//! eagerly materialized zero-copy buffer (recorder side) or an explicit
//! `(offset, length)` reference into a shared seekable handle (replay side),
//! materialized on first access. The shared handle is serialized with a mutex
//! so lazy frames can be decoded from any task, one reader at a time.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::body::PoseSnapshot;
use crate::{CaptureError, Result};

/// One of the four recorded channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StreamKind {
    Body = 0,
    Color = 1,
    Depth = 2,
    Infrared = 3,
}

impl StreamKind {
    /// Decode the on-disk stream tag. Unknown tags are a structural error and
    /// abort the load.
    pub fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(StreamKind::Body),
            1 => Ok(StreamKind::Color),
            2 => Ok(StreamKind::Depth),
            3 => Ok(StreamKind::Infrared),
            other => {
                Err(CaptureError::parse("frame record", format!("unknown stream tag {other}")))
            }
        }
    }

    /// The `i32` tag written to the container.
    pub fn tag(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Body => "body",
            StreamKind::Color => "color",
            StreamKind::Depth => "depth",
            StreamKind::Infrared => "infrared",
        };
        f.write_str(name)
    }
}

/// Seekable byte source shared by lazy frames of one replay session.
pub trait FrameSource: Read + Seek + Send {}
impl<T: Read + Seek + Send> FrameSource for T {}

/// Shared, mutex-serialized read handle for on-demand payload access.
pub type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

/// Stored payload bytes: eager buffer or a deferred container reference.
#[derive(Clone)]
pub enum PixelData {
    /// Bytes held in memory (zero-copy via Arc).
    Eager(Arc<[u8]>),
    /// A `(offset, length)` region of the container, read on first access.
    Lazy { source: SharedSource, offset: u64, length: u32 },
}

impl PixelData {
    /// Wrap an in-memory buffer.
    pub fn eager(bytes: Vec<u8>) -> Self {
        PixelData::Eager(bytes.into())
    }

    /// Number of stored bytes.
    pub fn len(&self) -> usize {
        match self {
            PixelData::Eager(bytes) => bytes.len(),
            PixelData::Lazy { length, .. } => *length as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the stored bytes, reading through the shared handle for
    /// lazy references. A short read means the container was truncated after
    /// indexing and is reported as payload corruption.
    pub fn bytes(&self) -> Result<Arc<[u8]>> {
        match self {
            PixelData::Eager(bytes) => Ok(Arc::clone(bytes)),
            PixelData::Lazy { source, offset, length } => {
                let mut guard = source.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.seek(SeekFrom::Start(*offset)).map_err(|e| {
                    CaptureError::corrupt_payload(format!(
                        "seek to payload at offset {offset} failed: {e}"
                    ))
                })?;
                let mut buf = vec![0u8; *length as usize];
                guard.read_exact(&mut buf).map_err(|e| {
                    CaptureError::corrupt_payload(format!(
                        "read of {length} payload bytes at offset {offset} failed: {e}"
                    ))
                })?;
                Ok(buf.into())
            }
        }
    }
}

impl fmt::Debug for PixelData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelData::Eager(bytes) => {
                f.debug_tuple("Eager").field(&format_args!("{} bytes", bytes.len())).finish()
            }
            PixelData::Lazy { offset, length, .. } => f
                .debug_struct("Lazy")
                .field("offset", offset)
                .field("length", length)
                .finish_non_exhaustive(),
        }
    }
}

/// A color frame: BGRA pixels, possibly codec-compressed in storage.
#[derive(Debug, Clone)]
pub struct ColorFrame {
    pub width: i32,
    pub height: i32,
    /// Codec that produced the stored bytes; selects the decoder on access.
    pub codec_id: i32,
    pub data: PixelData,
}

impl ColorFrame {
    /// Decode the stored bytes into a BGRA pixel buffer through the codec
    /// persisted in the container header.
    pub fn pixels(&self) -> Result<Vec<u8>> {
        let raw = self.data.bytes()?;
        let codec = crate::codec::codec_for_id(self.codec_id)?;
        codec.decode(&raw)
    }
}

/// A depth frame: 16-bit millimeter samples plus reliable-distance bounds.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub width: i32,
    pub height: i32,
    pub bytes_per_pixel: u32,
    pub min_reliable_distance: u32,
    pub max_reliable_distance: u32,
    pub data: PixelData,
}

impl DepthFrame {
    /// Materialize the little-endian `u16` sample grid.
    pub fn samples(&self) -> Result<Vec<u16>> {
        samples_from(&self.data)
    }
}

/// An infrared frame: 16-bit intensity samples.
#[derive(Debug, Clone)]
pub struct InfraredFrame {
    pub width: i32,
    pub height: i32,
    pub bytes_per_pixel: u32,
    pub data: PixelData,
}

impl InfraredFrame {
    /// Materialize the little-endian `u16` sample grid.
    pub fn samples(&self) -> Result<Vec<u16>> {
        samples_from(&self.data)
    }
}

fn samples_from(data: &PixelData) -> Result<Vec<u16>> {
    let raw = data.bytes()?;
    if raw.len() % 2 != 0 {
        return Err(CaptureError::corrupt_payload(format!(
            "sample buffer length {} is not a whole number of u16 values",
            raw.len()
        )));
    }
    Ok(raw.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])).collect())
}

/// A body frame: floor plane plus one pose slot per trackable subject.
#[derive(Debug, Clone)]
pub struct BodyFrame {
    pub floor_plane: [f32; 4],
    pub bodies: Vec<PoseSnapshot>,
}

impl BodyFrame {
    /// Number of body slots serialized for this frame.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Number of slots with a tracked subject.
    pub fn tracked_count(&self) -> usize {
        self.bodies.iter().filter(|b| b.is_tracked).count()
    }
}

/// Closed sum over the four channel payloads.
#[derive(Debug, Clone)]
pub enum FramePayload {
    Color(ColorFrame),
    Depth(DepthFrame),
    Body(BodyFrame),
    Infrared(InfraredFrame),
}

/// One recorded frame: channel payload plus its relative capture time.
///
/// Immutable once constructed. `relative_time` is the elapsed duration since
/// the start of capture and defines total order within a stream (ties broken
/// arbitrarily).
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub relative_time: Duration,
    pub payload: FramePayload,
}

impl FrameRecord {
    pub fn new(relative_time: Duration, payload: FramePayload) -> Self {
        Self { relative_time, payload }
    }

    /// The channel this frame belongs to.
    pub fn kind(&self) -> StreamKind {
        match &self.payload {
            FramePayload::Color(_) => StreamKind::Color,
            FramePayload::Depth(_) => StreamKind::Depth,
            FramePayload::Body(_) => StreamKind::Body,
            FramePayload::Infrared(_) => StreamKind::Infrared,
        }
    }

    pub fn as_color(&self) -> Option<&ColorFrame> {
        match &self.payload {
            FramePayload::Color(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_depth(&self) -> Option<&DepthFrame> {
        match &self.payload {
            FramePayload::Depth(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_body(&self) -> Option<&BodyFrame> {
        match &self.payload {
            FramePayload::Body(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_infrared(&self) -> Option<&InfraredFrame> {
        match &self.payload {
            FramePayload::Infrared(frame) => Some(frame),
            _ => None,
        }
    }
}
