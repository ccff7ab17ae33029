//! Articulated-pose vocabulary for the body stream.
//!
//! Matches the 25-joint skeleton emitted by the sensor: joint identifiers,
//! per-joint tracking state, hand states with confidences, and the per-body
//! clipped-edges flags. Values map one-to-one to the `i32` tags stored in the
//! container, so every enum here carries explicit discriminants.

use serde::{Deserialize, Serialize};

use crate::{CaptureError, Result};

/// Number of body slots a single frame carries, tracked or not.
pub const MAX_BODIES: usize = 6;

/// Joint identifiers of the articulated skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum JointType {
    SpineBase = 0,
    SpineMid = 1,
    Neck = 2,
    Head = 3,
    ShoulderLeft = 4,
    ElbowLeft = 5,
    WristLeft = 6,
    HandLeft = 7,
    ShoulderRight = 8,
    ElbowRight = 9,
    WristRight = 10,
    HandRight = 11,
    HipLeft = 12,
    KneeLeft = 13,
    AnkleLeft = 14,
    FootLeft = 15,
    HipRight = 16,
    KneeRight = 17,
    AnkleRight = 18,
    FootRight = 19,
    SpineShoulder = 20,
    HandTipLeft = 21,
    ThumbLeft = 22,
    HandTipRight = 23,
    ThumbRight = 24,
}

impl JointType {
    /// Total number of joint identifiers.
    pub const COUNT: usize = 25;

    /// Decode a joint tag read from the container.
    pub fn from_tag(tag: i32) -> Result<Self> {
        use JointType::*;
        let joint = match tag {
            0 => SpineBase,
            1 => SpineMid,
            2 => Neck,
            3 => Head,
            4 => ShoulderLeft,
            5 => ElbowLeft,
            6 => WristLeft,
            7 => HandLeft,
            8 => ShoulderRight,
            9 => ElbowRight,
            10 => WristRight,
            11 => HandRight,
            12 => HipLeft,
            13 => KneeLeft,
            14 => AnkleLeft,
            15 => FootLeft,
            16 => HipRight,
            17 => KneeRight,
            18 => AnkleRight,
            19 => FootRight,
            20 => SpineShoulder,
            21 => HandTipLeft,
            22 => ThumbLeft,
            23 => HandTipRight,
            24 => ThumbRight,
            other => {
                return Err(CaptureError::corrupt_payload(format!("unknown joint tag {other}")));
            }
        };
        Ok(joint)
    }

    /// The `i32` tag written to the container.
    pub fn tag(self) -> i32 {
        self as i32
    }
}

/// Tracking quality for a joint or the lean vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum TrackingState {
    #[default]
    NotTracked = 0,
    Inferred = 1,
    Tracked = 2,
}

impl TrackingState {
    pub fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(TrackingState::NotTracked),
            1 => Ok(TrackingState::Inferred),
            2 => Ok(TrackingState::Tracked),
            other => {
                Err(CaptureError::corrupt_payload(format!("unknown tracking state {other}")))
            }
        }
    }

    pub fn tag(self) -> i32 {
        self as i32
    }
}

/// Recognized state of a tracked hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum HandState {
    #[default]
    Unknown = 0,
    NotTracked = 1,
    Open = 2,
    Closed = 3,
    Lasso = 4,
}

impl HandState {
    pub fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(HandState::Unknown),
            1 => Ok(HandState::NotTracked),
            2 => Ok(HandState::Open),
            3 => Ok(HandState::Closed),
            4 => Ok(HandState::Lasso),
            other => Err(CaptureError::corrupt_payload(format!("unknown hand state {other}"))),
        }
    }

    pub fn tag(self) -> i32 {
        self as i32
    }
}

/// Confidence of a hand-state classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum TrackingConfidence {
    #[default]
    Low = 0,
    High = 1,
}

impl TrackingConfidence {
    pub fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(TrackingConfidence::Low),
            1 => Ok(TrackingConfidence::High),
            other => {
                Err(CaptureError::corrupt_payload(format!("unknown confidence {other}")))
            }
        }
    }

    pub fn tag(self) -> i32 {
        self as i32
    }
}

bitflags::bitflags! {
    /// Frame edges a body was clipped against.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClippedEdges: u32 {
        const RIGHT = 0b0001;
        const LEFT = 0b0010;
        const TOP = 0b0100;
        const BOTTOM = 0b1000;
    }
}

/// One joint's camera-space position and tracking quality.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub joint_type: JointType,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub tracking_state: TrackingState,
}

/// One joint's hierarchical orientation quaternion `[x, y, z, w]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointOrientation {
    pub joint_type: JointType,
    pub orientation: [f32; 4],
}

/// Pose data for one body slot in a frame.
///
/// Untracked slots carry only the flag; every other field is meaningful only
/// when `is_tracked` is true. `tracking_id` is stable for a subject's lifetime
/// within the sequence but the producer may issue a fresh id at any time, so
/// it carries no cross-frame identity guarantee.
#[derive(Debug, Clone, Default)]
pub struct PoseSnapshot {
    pub is_tracked: bool,
    pub joints: Vec<Joint>,
    pub orientations: Vec<JointOrientation>,
    pub hand_left_confidence: TrackingConfidence,
    pub hand_left_state: HandState,
    pub hand_right_confidence: TrackingConfidence,
    pub hand_right_state: HandState,
    pub clipped_edges: ClippedEdges,
    pub is_restricted: bool,
    pub lean_x: f32,
    pub lean_y: f32,
    pub lean_tracking_state: TrackingState,
    pub tracking_id: u64,
}

impl PoseSnapshot {
    /// An untracked slot. Only the flag is serialized for these.
    pub fn untracked() -> Self {
        Self::default()
    }
}
