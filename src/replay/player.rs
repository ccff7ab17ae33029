//! Playback scheduler over loaded per-stream indexes.
//!
//! [`Replay`] owns the loaded container and a set of watch channels, one per
//! channel kind plus a finished flag. `start` spawns a tick task that advances
//! virtual playback time at the nominal frame interval and dispatches each
//! stream's current frame through its channel; `scrub_to` performs the same
//! dispatch synchronously at an arbitrary location. Tick and scrub share one
//! mutex, so they never interleave mid-dispatch.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::container::ContainerMetadata;
use crate::replay::loader::{self, LoadedContainer};
use crate::replay::StreamIndex;
use crate::types::{FrameRecord, FrameSource, StreamKind};
use crate::{CaptureError, Result};

/// Nominal tick period, one frame at 30 Hz.
const TICK_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);

/// Latest frame dispatched on a channel, `None` until the first dispatch.
pub type FrameSlot = Option<Arc<FrameRecord>>;

/// Scheduler state shared between the API surface and the tick task.
struct SchedulerState {
    streams: Vec<StreamIndex>,
    /// Elapsed virtual playback time, `0 ..= duration`.
    location: Duration,
}

/// Watch senders shared with the tick task.
struct Channels {
    frames: HashMap<StreamKind, watch::Sender<FrameSlot>>,
    finished: watch::Sender<bool>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    channels: Channels,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advance every stream to the given virtual location and dispatch frames
    /// whose cursor moved. Returns whether every stream has dispatched its
    /// last frame.
    fn dispatch_at(&self, state: &mut SchedulerState, starting_offset: Duration) -> bool {
        let current = starting_offset + state.location;
        for stream in &mut state.streams {
            if let Some(frame) = stream.advance_to(current) {
                if let Some(tx) = self.channels.frames.get(&stream.kind()) {
                    let _ = tx.send(Some(frame));
                }
            }
        }
        !state.streams.is_empty() && state.streams.iter().all(StreamIndex::finished)
    }
}

/// A loaded recording with playback over its streams.
///
/// Construct with [`open`](Replay::open) or [`from_source`](Replay::from_source);
/// loading parses and indexes the whole container up front, leaving pixel
/// payloads as lazy references into the source. Subscribe to channels before
/// calling [`start`](Replay::start) or [`scrub_to`](Replay::scrub_to), then
/// watch frames arrive.
pub struct Replay {
    metadata: ContainerMetadata,
    starting_offset: Duration,
    duration: Duration,
    /// Channel kinds with at least one frame.
    present: Vec<StreamKind>,
    shared: Arc<Shared>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Replay {
    /// Open a container file for playback.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| CaptureError::file_error(path.into(), e))?;
        Self::from_source(BufReader::new(file))
    }

    /// Load a container from any seekable byte source.
    pub fn from_source<S: FrameSource + 'static>(source: S) -> Result<Self> {
        let LoadedContainer { metadata, streams, starting_offset, duration } =
            loader::load(Box::new(source))?;

        let present = streams.iter().map(StreamIndex::kind).collect();
        let frames = [StreamKind::Body, StreamKind::Color, StreamKind::Depth, StreamKind::Infrared]
            .into_iter()
            .map(|kind| (kind, watch::channel(None).0))
            .collect();
        let (finished, _) = watch::channel(false);

        info!("Replay ready: {} streams, duration {duration:?}", streams.len());

        Ok(Self {
            metadata,
            starting_offset,
            duration,
            present,
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState { streams, location: Duration::ZERO }),
                channels: Channels { frames, finished },
            }),
            cancel: None,
            task: None,
        })
    }

    pub fn metadata(&self) -> &ContainerMetadata {
        &self.metadata
    }

    /// Total playback time, last timestamp minus the starting offset.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Current virtual playback time.
    pub fn location(&self) -> Duration {
        self.shared.lock_state().location
    }

    pub fn has_color_frames(&self) -> bool {
        self.present.contains(&StreamKind::Color)
    }

    pub fn has_depth_frames(&self) -> bool {
        self.present.contains(&StreamKind::Depth)
    }

    pub fn has_body_frames(&self) -> bool {
        self.present.contains(&StreamKind::Body)
    }

    pub fn has_infrared_frames(&self) -> bool {
        self.present.contains(&StreamKind::Infrared)
    }

    /// Snapshot of one channel's time-sorted frames. Empty when the channel
    /// is absent from the container.
    pub fn frames(&self, kind: StreamKind) -> Vec<Arc<FrameRecord>> {
        self.shared
            .lock_state()
            .streams
            .iter()
            .find(|stream| stream.kind() == kind)
            .map(|stream| stream.frames().to_vec())
            .unwrap_or_default()
    }

    /// Number of frames loaded for one channel.
    pub fn frame_count(&self, kind: StreamKind) -> usize {
        self.shared
            .lock_state()
            .streams
            .iter()
            .find(|stream| stream.kind() == kind)
            .map_or(0, StreamIndex::len)
    }

    pub fn is_playing(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| !cancel.is_cancelled())
    }

    /// Watch receiver for one channel. Holds the latest dispatched frame;
    /// slow receivers observe the newest frame, never a backlog.
    pub fn subscribe(&self, kind: StreamKind) -> watch::Receiver<FrameSlot> {
        // The map is populated for every kind at construction.
        self.shared.channels.frames[&kind].subscribe()
    }

    /// The subscription as an async stream of frame updates.
    pub fn frame_stream(&self, kind: StreamKind) -> WatchStream<FrameSlot> {
        WatchStream::from_changes(self.subscribe(kind))
    }

    /// Watch receiver for the finished flag, set when every stream has
    /// dispatched its last frame and playback auto-stops.
    pub fn finished_updates(&self) -> watch::Receiver<bool> {
        self.shared.channels.finished.subscribe()
    }

    /// Start the playback tick. No-op while already playing.
    pub fn start(&mut self) {
        if self.is_playing() {
            return;
        }

        // A previous run may have ended; reap its handle.
        self.task = None;
        let _ = self.shared.channels.finished.send(false);

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let starting_offset = self.starting_offset;
        let duration = self.duration;
        let task_cancel = cancel.clone();
        self.task = Some(tokio::spawn(async move {
            tick_task(shared, starting_offset, duration, task_cancel).await;
        }));
        self.cancel = Some(cancel);
        debug!("Playback started");
    }

    /// Stop playback and wait for the tick task to exit. Idempotent; the
    /// location is left where playback halted.
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
            debug!("Playback stopped");
        }
    }

    /// Jump to a playback location, clamped to `[0, duration]`, and dispatch
    /// every stream's current frame immediately. This is the only dispatch
    /// path outside the tick; it takes the tick's critical section, so a
    /// concurrent tick never interleaves with the scrub.
    pub fn scrub_to(&self, location: Duration) {
        let location = location.min(self.duration);
        let mut state = self.shared.lock_state();
        state.location = location;
        self.shared.dispatch_at(&mut state, self.starting_offset);
    }
}

impl fmt::Debug for Replay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replay")
            .field("duration", &self.duration)
            .field("starting_offset", &self.starting_offset)
            .field("streams", &self.present)
            .field("playing", &self.is_playing())
            .finish_non_exhaustive()
    }
}

impl Drop for Replay {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

/// Periodic dispatch loop. Each tick advances the virtual location by one
/// frame interval and dispatches under the shared mutex; the next sleep is
/// shortened by however long dispatch took, clamped to zero, so the average
/// rate tracks wall-clock time even under dispatch latency.
///
/// When every stream has dispatched its last frame the loop auto-stops:
/// location returns to zero, stream cursors reset for the next run, and the
/// finished flag flips. A scrub to the end does not auto-stop; only the tick
/// path aggregates the finished state.
async fn tick_task(
    shared: Arc<Shared>,
    starting_offset: Duration,
    duration: Duration,
    cancel: CancellationToken,
) {
    loop {
        let tick_started = tokio::time::Instant::now();

        let all_finished = {
            let mut state = shared.lock_state();
            state.location = (state.location + TICK_INTERVAL).min(duration);
            shared.dispatch_at(&mut state, starting_offset)
        };

        if all_finished {
            let mut state = shared.lock_state();
            state.location = Duration::ZERO;
            for stream in &mut state.streams {
                stream.reset();
            }
            drop(state);
            cancel.cancel();
            let _ = shared.channels.finished.send(true);
            info!("Playback finished");
            return;
        }

        let delay = TICK_INTERVAL.saturating_sub(tick_started.elapsed());
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerMetadata;
    use crate::record::writers;
    use crate::types::{BodyFrame, DepthFrame, PixelData};
    use std::io::Cursor;

    fn depth_frame() -> DepthFrame {
        DepthFrame {
            width: 2,
            height: 2,
            bytes_per_pixel: 2,
            min_reliable_distance: 500,
            max_reliable_distance: 4500,
            data: PixelData::eager(vec![0; 8]),
        }
    }

    fn two_stream_container() -> Vec<u8> {
        let mut bytes = Vec::new();
        ContainerMetadata::new(0).write_to(&mut bytes).unwrap();
        for ms in [0u64, 33, 66] {
            let payload = writers::serialize_depth(&depth_frame()).unwrap();
            writers::write_record(
                &mut bytes,
                StreamKind::Depth,
                Duration::from_millis(ms),
                &payload,
            )
            .unwrap();
        }
        let body = BodyFrame { floor_plane: [0.0; 4], bodies: Vec::new() };
        let payload = writers::serialize_body(&body).unwrap();
        writers::write_record(&mut bytes, StreamKind::Body, Duration::from_millis(33), &payload)
            .unwrap();
        bytes
    }

    fn open_replay() -> Replay {
        Replay::from_source(Cursor::new(two_stream_container())).expect("load")
    }

    #[tokio::test]
    async fn reports_present_streams_and_duration() {
        let replay = open_replay();
        assert!(replay.has_depth_frames());
        assert!(replay.has_body_frames());
        assert!(!replay.has_color_frames());
        assert!(!replay.has_infrared_frames());
        assert_eq!(replay.duration(), Duration::from_millis(66));
        assert_eq!(replay.location(), Duration::ZERO);
        assert!(!replay.is_playing());
    }

    #[tokio::test]
    async fn scrub_dispatches_current_frames_immediately() {
        let replay = open_replay();
        let mut depth = replay.subscribe(StreamKind::Depth);
        let mut body = replay.subscribe(StreamKind::Body);

        replay.scrub_to(Duration::from_millis(40));
        assert_eq!(replay.location(), Duration::from_millis(40));

        let frame = depth.borrow_and_update().clone().expect("depth frame dispatched");
        assert_eq!(frame.relative_time, Duration::from_millis(33));
        let frame = body.borrow_and_update().clone().expect("body frame dispatched");
        assert_eq!(frame.relative_time, Duration::from_millis(33));
    }

    #[tokio::test]
    async fn scrub_past_end_clamps_and_dispatches_final_frames_once() {
        let replay = open_replay();
        let mut depth = replay.subscribe(StreamKind::Depth);

        replay.scrub_to(Duration::from_secs(60));
        assert_eq!(replay.location(), replay.duration());
        let frame = depth.borrow_and_update().clone().expect("final frame");
        assert_eq!(frame.relative_time, Duration::from_millis(66));

        // Scrubbing to the same spot again must not re-dispatch
        replay.scrub_to(Duration::from_secs(60));
        assert!(!depth.has_changed().unwrap());
        // Scrub to the end never auto-stops or rewinds
        assert_eq!(replay.location(), replay.duration());
    }

    #[tokio::test(start_paused = true)]
    async fn playback_runs_to_completion_and_resets() {
        use tokio_stream::StreamExt;

        let mut replay = open_replay();
        let mut finished = replay.finished_updates();
        let mut depth = replay.frame_stream(StreamKind::Depth);

        // A watch channel keeps only the latest value, so collect frames
        // concurrently with the tick task.
        let collector = tokio::spawn(async move {
            let mut times = Vec::new();
            while let Some(update) = depth.next().await {
                if let Some(frame) = update {
                    let ms = frame.relative_time.as_millis();
                    times.push(ms);
                    if ms == 66 {
                        break;
                    }
                }
            }
            times
        });

        replay.start();
        assert!(replay.is_playing());

        finished.wait_for(|done| *done).await.expect("finished signal");
        assert_eq!(replay.location(), Duration::ZERO);
        assert!(!replay.is_playing());

        // The first tick advances location past t=0 before sampling, so the
        // frame at t=0 is superseded by the one at t=33 (latest at-or-before
        // semantics). The full list is reachable via scrubbing.
        let times = collector.await.expect("collector");
        assert_eq!(times, vec![33, 66]);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_playback_can_start_again() {
        let mut replay = open_replay();
        let mut finished = replay.finished_updates();

        replay.start();
        finished.wait_for(|done| *done).await.expect("first run");

        replay.start();
        assert!(replay.is_playing());
        finished.wait_for(|done| *done).await.expect("second run");
        replay.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_preserves_location() {
        let mut replay = open_replay();
        replay.scrub_to(Duration::from_millis(10));
        replay.start();
        // The paused clock never advances here, so the task runs at most one
        // tick before it observes the cancellation.
        replay.stop().await;
        let location = replay.location();
        assert!(location >= Duration::from_millis(10));
        assert!(location < replay.duration());
        assert!(!replay.is_playing());

        replay.stop().await;
        assert_eq!(replay.location(), location);
    }

    #[tokio::test]
    async fn double_start_is_a_no_op() {
        let mut replay = open_replay();
        replay.start();
        replay.start();
        assert!(replay.is_playing());
        replay.stop().await;
    }
}
