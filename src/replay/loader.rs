//! Container loader: parses a recording into per-stream indexes.
//!
//! Loading is a single synchronous pass. Each frame record is dispatched to
//! the index for its stream kind (created lazily on first occurrence);
//! pixel-bearing payloads keep `(offset, length)` references into the shared
//! source and defer materialization, while body payloads are parsed fully.
//!
//! Integrity policy: the `"[EOF]"` marker must follow every payload. A reader
//! that does not find it seeks back to `record_start + payload_size` and
//! retries once; if the retry reads a string that is still not the marker the
//! frame is dropped and loading continues, and if the retry cannot read a
//! string at all the load fails with `CorruptFile`. One damaged frame never
//! forfeits the rest of the recording.

use std::collections::HashMap;
use std::io::{Read, SeekFrom};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, warn};

use crate::body::{
    ClippedEdges, HandState, Joint, JointOrientation, JointType, PoseSnapshot, TrackingConfidence,
    TrackingState,
};
use crate::container::{ContainerMetadata, FRAME_END_MARKER, read_lp_string};
use crate::types::{
    BodyFrame, ColorFrame, DepthFrame, FramePayload, FrameRecord, FrameSource, InfraredFrame,
    PixelData, SharedSource, StreamKind,
};
use crate::{CaptureError, Result};

/// Upper bound on a single payload; larger sizes indicate a corrupt header.
const MAX_PAYLOAD_SIZE: i64 = 256 * 1024 * 1024;
/// Upper bound on per-body collection counts.
const MAX_COLLECTION_LEN: i32 = 10_000;

/// Result of parsing a whole container.
#[derive(Debug)]
pub(crate) struct LoadedContainer {
    pub metadata: ContainerMetadata,
    pub streams: Vec<crate::replay::StreamIndex>,
    pub starting_offset: Duration,
    pub duration: Duration,
}

/// Parse a container from a seekable source. The source is retained (shared,
/// mutex-serialized) by every lazy frame reference the load produces.
pub(crate) fn load(source: Box<dyn FrameSource>) -> Result<LoadedContainer> {
    let shared: SharedSource = Arc::new(Mutex::new(source));
    let mut indexes: HashMap<StreamKind, crate::replay::StreamIndex> = HashMap::new();
    let metadata;
    let mut kept = 0usize;
    let mut dropped = 0usize;

    {
        let mut guard = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let reader: &mut dyn FrameSource = &mut **guard;
        metadata = ContainerMetadata::read_from(reader)?;
        let legacy = metadata.is_legacy_body_layout()?;

        loop {
            let Some(header) = read_record_header(reader)? else {
                break;
            };
            let payload_start = reader
                .stream_position()
                .map_err(|e| CaptureError::parse("frame record", format!("seek failed: {e}")))?;
            let payload_end = payload_start
                .checked_add(header.payload_size as u64)
                .ok_or_else(|| CaptureError::parse("frame record", "payload end overflowed"))?;

            let payload =
                read_payload(reader, &shared, &header, payload_start, legacy, &metadata);

            // The typed parse may not have consumed exactly payload_size
            // bytes; the marker check always starts from the canonical
            // position so one bad payload cannot desync the scan.
            reader.seek(SeekFrom::Start(payload_end)).map_err(|e| {
                CaptureError::parse("frame record", format!("seek past payload failed: {e}"))
            })?;

            let marker_ok = check_marker(reader, payload_end)?;
            match (marker_ok, payload) {
                (true, Ok(frame_payload)) => {
                    let record = FrameRecord::new(header.relative_time, frame_payload);
                    indexes
                        .entry(header.kind)
                        .or_insert_with(|| crate::replay::StreamIndex::new(header.kind))
                        .push(record);
                    kept += 1;
                }
                (true, Err(e)) => {
                    warn!("Dropping {} frame at {:?}: {e}", header.kind, header.relative_time);
                    dropped += 1;
                }
                (false, _) => {
                    warn!(
                        "Dropping {} frame at {:?}: integrity marker damaged",
                        header.kind, header.relative_time
                    );
                    dropped += 1;
                }
            }
        }
    }

    let mut streams: Vec<_> = indexes.into_values().filter(|index| !index.is_empty()).collect();
    for index in &mut streams {
        index.finalize();
    }
    streams.sort_by_key(|index| index.kind().tag());

    let starting_offset = streams.iter().filter_map(|s| s.first_time()).min().unwrap_or_default();
    let last = streams.iter().filter_map(|s| s.last_time()).max().unwrap_or_default();
    let duration = last.saturating_sub(starting_offset);

    debug!(
        "Loaded container: {} streams, {kept} frames kept, {dropped} dropped, duration {duration:?}",
        streams.len()
    );

    Ok(LoadedContainer { metadata, streams, starting_offset, duration })
}

struct RecordHeader {
    kind: StreamKind,
    relative_time: Duration,
    payload_size: i64,
}

/// Read the fixed frame-record header, or `None` at a clean end of stream.
fn read_record_header<R: Read + ?Sized>(reader: &mut R) -> Result<Option<RecordHeader>> {
    let tag = match reader.read_i32::<LittleEndian>() {
        Ok(tag) => tag,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(CaptureError::parse("frame record", format!("header read failed: {e}")));
        }
    };
    let kind = StreamKind::from_tag(tag)?;

    let millis = reader
        .read_f64::<LittleEndian>()
        .map_err(|e| CaptureError::parse("frame record", format!("timestamp read failed: {e}")))?;
    if !millis.is_finite() || millis < 0.0 {
        return Err(CaptureError::parse(
            "frame record",
            format!("invalid relative timestamp {millis} ms"),
        ));
    }
    let relative_time = Duration::from_secs_f64(millis / 1000.0);

    let payload_size = reader
        .read_i64::<LittleEndian>()
        .map_err(|e| CaptureError::parse("frame record", format!("size read failed: {e}")))?;
    if !(0..=MAX_PAYLOAD_SIZE).contains(&payload_size) {
        return Err(CaptureError::parse(
            "frame record",
            format!("unreasonable payload size {payload_size}"),
        ));
    }

    Ok(Some(RecordHeader { kind, relative_time, payload_size }))
}

/// Parse the typed payload. Errors here are frame-local: the caller drops the
/// frame and keeps loading.
fn read_payload(
    reader: &mut dyn FrameSource,
    shared: &SharedSource,
    header: &RecordHeader,
    payload_start: u64,
    legacy: bool,
    metadata: &ContainerMetadata,
) -> Result<FramePayload> {
    match header.kind {
        StreamKind::Color => {
            let width = reader.read_i32::<LittleEndian>()?;
            let height = reader.read_i32::<LittleEndian>()?;
            let byte_length = reader.read_i32::<LittleEndian>()?;
            if byte_length < 0 || i64::from(byte_length) + 12 > header.payload_size {
                return Err(CaptureError::corrupt_payload(format!(
                    "color byte length {byte_length} exceeds payload of {}",
                    header.payload_size
                )));
            }
            Ok(FramePayload::Color(ColorFrame {
                width,
                height,
                codec_id: metadata.color_codec_id,
                data: PixelData::Lazy {
                    source: Arc::clone(shared),
                    offset: payload_start + 12,
                    length: byte_length as u32,
                },
            }))
        }
        StreamKind::Depth => {
            let min_reliable_distance = reader.read_u32::<LittleEndian>()?;
            let max_reliable_distance = reader.read_u32::<LittleEndian>()?;
            let width = reader.read_i32::<LittleEndian>()?;
            let height = reader.read_i32::<LittleEndian>()?;
            let bytes_per_pixel = reader.read_u32::<LittleEndian>()?;
            let length = sample_grid_length(width, height, header.payload_size - 20)?;
            Ok(FramePayload::Depth(DepthFrame {
                width,
                height,
                bytes_per_pixel,
                min_reliable_distance,
                max_reliable_distance,
                data: PixelData::Lazy {
                    source: Arc::clone(shared),
                    offset: payload_start + 20,
                    length,
                },
            }))
        }
        StreamKind::Infrared => {
            let width = reader.read_i32::<LittleEndian>()?;
            let height = reader.read_i32::<LittleEndian>()?;
            let bytes_per_pixel = reader.read_u32::<LittleEndian>()?;
            let length = sample_grid_length(width, height, header.payload_size - 12)?;
            Ok(FramePayload::Infrared(InfraredFrame {
                width,
                height,
                bytes_per_pixel,
                data: PixelData::Lazy {
                    source: Arc::clone(shared),
                    offset: payload_start + 12,
                    length,
                },
            }))
        }
        StreamKind::Body => Ok(FramePayload::Body(parse_body_payload(reader, legacy)?)),
    }
}

/// Validate that a `u16` sample grid of `width * height` fits the remaining
/// payload exactly.
fn sample_grid_length(width: i32, height: i32, available: i64) -> Result<u32> {
    if width <= 0 || height <= 0 {
        return Err(CaptureError::corrupt_payload(format!(
            "invalid sample dimensions {width}x{height}"
        )));
    }
    let expected = i64::from(width) * i64::from(height) * 2;
    if expected != available {
        return Err(CaptureError::corrupt_payload(format!(
            "{width}x{height} grid needs {expected} bytes, payload holds {available}"
        )));
    }
    Ok(expected as u32)
}

fn read_collection_len<R: Read + ?Sized>(reader: &mut R, what: &str) -> Result<i32> {
    let count = reader.read_i32::<LittleEndian>()?;
    if !(0..=MAX_COLLECTION_LEN).contains(&count) {
        return Err(CaptureError::corrupt_payload(format!("unreasonable {what} count {count}")));
    }
    Ok(count)
}

/// Parse a body payload. Legacy (major version 1) files carry three ignored
/// maps between the joint dictionary and the hand states.
pub(crate) fn parse_body_payload<R: Read + ?Sized>(
    reader: &mut R,
    legacy: bool,
) -> Result<BodyFrame> {
    let body_count = read_collection_len(reader, "body")?;
    let mut floor_plane = [0f32; 4];
    for component in &mut floor_plane {
        *component = reader.read_f32::<LittleEndian>()?;
    }

    let mut bodies = Vec::with_capacity(body_count as usize);
    for _ in 0..body_count {
        let is_tracked = reader.read_u8()? != 0;
        if !is_tracked {
            bodies.push(PoseSnapshot::untracked());
            continue;
        }

        let orientation_count = read_collection_len(reader, "orientation")?;
        let mut orientations = Vec::with_capacity(orientation_count as usize);
        for _ in 0..orientation_count {
            // Dictionary key precedes the entry's own joint field.
            let _key = reader.read_i32::<LittleEndian>()?;
            let joint_type = JointType::from_tag(reader.read_i32::<LittleEndian>()?)?;
            let mut orientation = [0f32; 4];
            for component in &mut orientation {
                *component = reader.read_f32::<LittleEndian>()?;
            }
            orientations.push(JointOrientation { joint_type, orientation });
        }

        let joint_count = read_collection_len(reader, "joint")?;
        let mut joints = Vec::with_capacity(joint_count as usize);
        for _ in 0..joint_count {
            let _key = reader.read_i32::<LittleEndian>()?;
            let joint_type = JointType::from_tag(reader.read_i32::<LittleEndian>()?)?;
            let x = reader.read_f32::<LittleEndian>()?;
            let y = reader.read_f32::<LittleEndian>()?;
            let z = reader.read_f32::<LittleEndian>()?;
            let tracking_state = TrackingState::from_tag(reader.read_i32::<LittleEndian>()?)?;
            joints.push(Joint { joint_type, x, y, z, tracking_state });
        }

        if legacy {
            skip_legacy_maps(reader)?;
        }

        let hand_left_confidence = TrackingConfidence::from_tag(reader.read_i32::<LittleEndian>()?)?;
        let hand_left_state = HandState::from_tag(reader.read_i32::<LittleEndian>()?)?;
        let hand_right_confidence =
            TrackingConfidence::from_tag(reader.read_i32::<LittleEndian>()?)?;
        let hand_right_state = HandState::from_tag(reader.read_i32::<LittleEndian>()?)?;
        let clipped_edges = ClippedEdges::from_bits_truncate(reader.read_i32::<LittleEndian>()? as u32);
        let is_restricted = reader.read_u8()? != 0;
        let lean_x = reader.read_f32::<LittleEndian>()?;
        let lean_y = reader.read_f32::<LittleEndian>()?;
        let lean_tracking_state = TrackingState::from_tag(reader.read_i32::<LittleEndian>()?)?;
        let tracking_id = reader.read_u64::<LittleEndian>()?;

        bodies.push(PoseSnapshot {
            is_tracked: true,
            joints,
            orientations,
            hand_left_confidence,
            hand_left_state,
            hand_right_confidence,
            hand_right_state,
            clipped_edges,
            is_restricted,
            lean_x,
            lean_y,
            lean_tracking_state,
            tracking_id,
        });
    }

    Ok(BodyFrame { floor_plane, bodies })
}

/// Skip the activity/appearance/expression maps of legacy files.
fn skip_legacy_maps<R: Read + ?Sized>(reader: &mut R) -> Result<()> {
    for what in ["activity", "appearance", "expression"] {
        let count = read_collection_len(reader, what)?;
        for _ in 0..count {
            let _key = reader.read_i32::<LittleEndian>()?;
            let _value = reader.read_i32::<LittleEndian>()?;
        }
    }
    Ok(())
}

/// Verify the integrity marker after a payload: try at the current position,
/// then resync to `marker_pos` and retry once. Returns whether the frame
/// should be kept; an unreadable retry is unrecoverable.
fn check_marker(reader: &mut dyn FrameSource, marker_pos: u64) -> Result<bool> {
    if let Ok(s) = read_lp_string(reader) {
        if s == FRAME_END_MARKER {
            return Ok(true);
        }
    }

    reader.seek(SeekFrom::Start(marker_pos)).map_err(|e| {
        CaptureError::corrupt_file(format!("resync seek to {marker_pos} failed: {e}"))
    })?;
    match read_lp_string(reader) {
        Ok(s) if s == FRAME_END_MARKER => Ok(true),
        Ok(other) => {
            warn!("Integrity marker read as {other:?} after resync");
            Ok(false)
        }
        Err(e) => Err(CaptureError::corrupt_file(format!(
            "integrity marker unreadable after resync at {marker_pos}: {e}"
        ))),
    }
}
