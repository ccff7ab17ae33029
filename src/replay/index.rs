//! Per-stream frame index for replay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{FrameRecord, StreamKind};

/// Time-sorted frame list for one channel, with a timestamp lookup map and a
/// playback cursor.
///
/// Built by the loader in two phases: frames are pushed in file order, then
/// [`finalize`](Self::finalize) sorts by relative time and builds the
/// timestamp map. A stream with zero frames is never handed to playback.
#[derive(Debug)]
pub struct StreamIndex {
    kind: StreamKind,
    frames: Vec<Arc<FrameRecord>>,
    positions: HashMap<Duration, usize>,
    /// Index of the most recently dispatched frame.
    cursor: Option<usize>,
    finished: bool,
}

impl StreamIndex {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            frames: Vec::new(),
            positions: HashMap::new(),
            cursor: None,
            finished: false,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Append a frame in file order; ordering is established by `finalize`.
    pub fn push(&mut self, frame: FrameRecord) {
        self.frames.push(Arc::new(frame));
    }

    /// Sort frames by relative time and build the timestamp map. Ties keep
    /// file order (stable sort) and the map points at the last of a run of
    /// equal timestamps.
    pub fn finalize(&mut self) {
        self.frames.sort_by_key(|f| f.relative_time);
        self.positions =
            self.frames.iter().enumerate().map(|(i, f)| (f.relative_time, i)).collect();
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Arc<FrameRecord>] {
        &self.frames
    }

    /// List position of a frame by its exact timestamp, O(1) through the
    /// timestamp map. Playback itself samples with [`current_position`]
    /// (latest at-or-before); this lookup serves consumers that already hold
    /// a frame's timestamp and want its index back.
    ///
    /// [`current_position`]: Self::current_position
    pub fn position_for(&self, timestamp: Duration) -> Option<usize> {
        self.positions.get(&timestamp).copied()
    }

    pub fn first_time(&self) -> Option<Duration> {
        self.frames.first().map(|f| f.relative_time)
    }

    pub fn last_time(&self) -> Option<Duration> {
        self.frames.last().map(|f| f.relative_time)
    }

    /// Index of the last frame with `relative_time <= at`, if any.
    pub fn current_position(&self, at: Duration) -> Option<usize> {
        let after = self.frames.partition_point(|f| f.relative_time <= at);
        after.checked_sub(1)
    }

    /// Move the cursor to the current frame for virtual time `at`. Returns the
    /// frame when it differs from the previously dispatched one, so callers
    /// dispatch each frame at most once per cursor position. The stream counts
    /// as finished while the cursor sits on the last frame; moving backwards
    /// (a rewind scrub) clears both cursor and finished state.
    pub fn advance_to(&mut self, at: Duration) -> Option<Arc<FrameRecord>> {
        let Some(position) = self.current_position(at) else {
            self.cursor = None;
            self.finished = false;
            return None;
        };
        if self.cursor == Some(position) {
            return None;
        }
        self.cursor = Some(position);
        self.finished = position + 1 == self.frames.len();
        Some(Arc::clone(&self.frames[position]))
    }

    /// Whether the stream's last frame has been dispatched.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Rewind the cursor for a fresh playback run.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.finished = false;
    }
}
