//! Core types for sensor frame representation.
//!
//! - [`FrameRecord`] is the unit that flows through recording and replay: a
//!   relative timestamp plus a closed payload sum over the four channels
//! - [`PixelData`] carries payload bytes either eagerly (zero-copy via Arc) or
//!   as an explicit `(offset, length)` reference resolved on first access
//! - [`body`] holds the articulated-pose vocabulary (joints, hand states,
//!   clipped edges, pose snapshots)

pub mod body;
mod frame;

pub use frame::{
    BodyFrame, ColorFrame, DepthFrame, FramePayload, FrameRecord, FrameSource, InfraredFrame,
    PixelData, SharedSource, StreamKind,
};
