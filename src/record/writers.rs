//! Per-channel frame serializers.
//!
//! Each channel's payload is built in a private buffer first, so the record
//! header can carry the exact payload size, then the whole record goes out in
//! one call: `[stream_type][relative_time_ms][payload_size][payload][marker]`.
//! Layouts are little-endian throughout and match the replay loader
//! field-for-field.

use std::io::Write;
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::codec::EncodedColor;
use crate::container::{FRAME_END_MARKER, write_lp_string};
use crate::types::{BodyFrame, DepthFrame, InfraredFrame, StreamKind};
use crate::Result;

/// Write one complete frame record with its integrity marker.
pub(crate) fn write_record<W: Write>(
    sink: &mut W,
    kind: StreamKind,
    relative_time: Duration,
    payload: &[u8],
) -> std::io::Result<()> {
    sink.write_i32::<LittleEndian>(kind.tag())?;
    sink.write_f64::<LittleEndian>(relative_time.as_secs_f64() * 1000.0)?;
    sink.write_i64::<LittleEndian>(payload.len() as i64)?;
    sink.write_all(payload)?;
    write_lp_string(sink, FRAME_END_MARKER)
}

/// Color payload: codec-produced dimensions and bytes.
pub(crate) fn serialize_color(encoded: &EncodedColor) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(12 + encoded.bytes.len());
    payload.write_i32::<LittleEndian>(encoded.width)?;
    payload.write_i32::<LittleEndian>(encoded.height)?;
    payload.write_i32::<LittleEndian>(encoded.bytes.len() as i32)?;
    payload.extend_from_slice(&encoded.bytes);
    Ok(payload)
}

/// Depth payload: reliable-distance bounds, dimensions, raw u16 samples.
pub(crate) fn serialize_depth(frame: &DepthFrame) -> Result<Vec<u8>> {
    let samples = frame.data.bytes()?;
    let mut payload = Vec::with_capacity(20 + samples.len());
    payload.write_u32::<LittleEndian>(frame.min_reliable_distance)?;
    payload.write_u32::<LittleEndian>(frame.max_reliable_distance)?;
    payload.write_i32::<LittleEndian>(frame.width)?;
    payload.write_i32::<LittleEndian>(frame.height)?;
    payload.write_u32::<LittleEndian>(frame.bytes_per_pixel)?;
    payload.extend_from_slice(&samples);
    Ok(payload)
}

/// Infrared payload: dimensions and raw u16 samples.
pub(crate) fn serialize_infrared(frame: &InfraredFrame) -> Result<Vec<u8>> {
    let samples = frame.data.bytes()?;
    let mut payload = Vec::with_capacity(12 + samples.len());
    payload.write_i32::<LittleEndian>(frame.width)?;
    payload.write_i32::<LittleEndian>(frame.height)?;
    payload.write_u32::<LittleEndian>(frame.bytes_per_pixel)?;
    payload.extend_from_slice(&samples);
    Ok(payload)
}

/// Body payload: floor plane plus one slot per body. Untracked slots write
/// only the tracked flag, keeping them a single byte.
pub(crate) fn serialize_body(frame: &BodyFrame) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    payload.write_i32::<LittleEndian>(frame.bodies.len() as i32)?;
    for component in frame.floor_plane {
        payload.write_f32::<LittleEndian>(component)?;
    }

    for body in &frame.bodies {
        payload.write_u8(body.is_tracked as u8)?;
        if !body.is_tracked {
            continue;
        }

        // Joint dictionaries serialize as key then entry, so the joint tag
        // appears twice per entry.
        payload.write_i32::<LittleEndian>(body.orientations.len() as i32)?;
        for orientation in &body.orientations {
            payload.write_i32::<LittleEndian>(orientation.joint_type.tag())?;
            payload.write_i32::<LittleEndian>(orientation.joint_type.tag())?;
            for component in orientation.orientation {
                payload.write_f32::<LittleEndian>(component)?;
            }
        }

        payload.write_i32::<LittleEndian>(body.joints.len() as i32)?;
        for joint in &body.joints {
            payload.write_i32::<LittleEndian>(joint.joint_type.tag())?;
            payload.write_i32::<LittleEndian>(joint.joint_type.tag())?;
            payload.write_f32::<LittleEndian>(joint.x)?;
            payload.write_f32::<LittleEndian>(joint.y)?;
            payload.write_f32::<LittleEndian>(joint.z)?;
            payload.write_i32::<LittleEndian>(joint.tracking_state.tag())?;
        }

        payload.write_i32::<LittleEndian>(body.hand_left_confidence.tag())?;
        payload.write_i32::<LittleEndian>(body.hand_left_state.tag())?;
        payload.write_i32::<LittleEndian>(body.hand_right_confidence.tag())?;
        payload.write_i32::<LittleEndian>(body.hand_right_state.tag())?;
        payload.write_i32::<LittleEndian>(body.clipped_edges.bits() as i32)?;
        payload.write_u8(body.is_restricted as u8)?;
        payload.write_f32::<LittleEndian>(body.lean_x)?;
        payload.write_f32::<LittleEndian>(body.lean_y)?;
        payload.write_i32::<LittleEndian>(body.lean_tracking_state.tag())?;
        payload.write_u64::<LittleEndian>(body.tracking_id)?;
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{
        ClippedEdges, HandState, Joint, JointOrientation, JointType, PoseSnapshot,
        TrackingConfidence, TrackingState,
    };
    use crate::types::PixelData;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;

    fn tracked_snapshot() -> PoseSnapshot {
        PoseSnapshot {
            is_tracked: true,
            joints: vec![Joint {
                joint_type: JointType::Head,
                x: 0.1,
                y: 0.5,
                z: 1.9,
                tracking_state: TrackingState::Tracked,
            }],
            orientations: vec![JointOrientation {
                joint_type: JointType::Head,
                orientation: [0.0, 0.0, 0.0, 1.0],
            }],
            hand_left_confidence: TrackingConfidence::High,
            hand_left_state: HandState::Open,
            hand_right_confidence: TrackingConfidence::Low,
            hand_right_state: HandState::Closed,
            clipped_edges: ClippedEdges::BOTTOM,
            is_restricted: false,
            lean_x: 0.05,
            lean_y: -0.02,
            lean_tracking_state: TrackingState::Tracked,
            tracking_id: 42,
        }
    }

    #[test]
    fn record_header_layout_is_stable() {
        let mut sink = Vec::new();
        write_record(&mut sink, StreamKind::Depth, Duration::from_millis(33), &[1, 2, 3]).unwrap();

        let mut cursor = Cursor::new(&sink);
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), StreamKind::Depth.tag());
        assert!((cursor.read_f64::<LittleEndian>().unwrap() - 33.0).abs() < f64::EPSILON);
        assert_eq!(cursor.read_i64::<LittleEndian>().unwrap(), 3);
        let mut payload = [0u8; 3];
        std::io::Read::read_exact(&mut cursor, &mut payload).unwrap();
        assert_eq!(payload, [1, 2, 3]);
        assert_eq!(&sink[sink.len() - 6..], b"\x05[EOF]");
    }

    #[test]
    fn untracked_body_slot_costs_one_byte() {
        let only_flags = BodyFrame {
            floor_plane: [0.0; 4],
            bodies: vec![PoseSnapshot::untracked(), PoseSnapshot::untracked()],
        };
        let payload = serialize_body(&only_flags).unwrap();
        // count + floor plane + two flag bytes
        assert_eq!(payload.len(), 4 + 16 + 2);
    }

    #[test]
    fn tracked_body_slot_serializes_joint_dictionaries() {
        let frame = BodyFrame { floor_plane: [0.0, 1.0, 0.0, 0.8], bodies: vec![tracked_snapshot()] };
        let payload = serialize_body(&frame).unwrap();

        let mut cursor = Cursor::new(&payload);
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), 1);
        for expected in [0.0f32, 1.0, 0.0, 0.8] {
            assert_eq!(cursor.read_f32::<LittleEndian>().unwrap(), expected);
        }
        assert_eq!(cursor.read_u8().unwrap(), 1); // tracked
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), 1); // orientation count
        // Dictionary key, then the entry's own joint field
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), JointType::Head.tag());
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), JointType::Head.tag());
    }

    #[test]
    fn depth_payload_layout_matches_loader_expectation() {
        let frame = DepthFrame {
            width: 2,
            height: 1,
            bytes_per_pixel: 2,
            min_reliable_distance: 500,
            max_reliable_distance: 4500,
            data: PixelData::eager(vec![0x10, 0x00, 0x20, 0x00]),
        };
        let payload = serialize_depth(&frame).unwrap();

        let mut cursor = Cursor::new(&payload);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 500);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 4500);
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), 2);
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), 1);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 2);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 0x10);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 0x20);
    }

    #[test]
    fn infrared_payload_omits_distance_bounds() {
        let frame = InfraredFrame {
            width: 1,
            height: 1,
            bytes_per_pixel: 2,
            data: PixelData::eager(vec![0xAA, 0x00]),
        };
        let payload = serialize_infrared(&frame).unwrap();
        assert_eq!(payload.len(), 12 + 2);
    }
}
