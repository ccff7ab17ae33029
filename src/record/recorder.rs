//! Recording pipeline.
//!
//! A [`Recorder`] accepts typed frame events from any producer context and
//! persists them through a single background drain task that owns the output
//! sink. Producers only touch an unbounded MPSC queue, so frame arrival never
//! waits on encode or write latency; sustained throughput below the producer
//! rate grows the queue without bound, so callers size recording duration and
//! resolution accordingly (documented capacity caveat, not enforced).
//!
//! State machine: `NotStarted → Started → Stopped`, terminal. `start()` writes
//! the container metadata before the drain task exists, and `stop()` joins the
//! drain task after it has flushed, so the metadata write and the final
//! flush/close never race in-flight frame writes.
//!
//! A frame that fails to encode or write is logged and dropped; a damaged
//! frame never aborts an active session.

use std::io::Write;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{ColorCodec, ColorCodecChoice};
use crate::container::ContainerMetadata;
use crate::types::{
    BodyFrame, ColorFrame, DepthFrame, FramePayload, FrameRecord, InfraredFrame, PixelData,
    StreamKind,
};
use crate::{CaptureError, Result};

use super::writers;

/// Sink flush cadence while draining.
const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Recording configuration, immutable once the recorder has started.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub color_enabled: bool,
    pub depth_enabled: bool,
    pub body_enabled: bool,
    pub infrared_enabled: bool,
    pub color_codec: ColorCodecChoice,
    /// Optional depth-to-camera-space calibration table persisted in the
    /// container metadata.
    pub depth_calibration: Option<Vec<f32>>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            color_enabled: true,
            depth_enabled: true,
            body_enabled: true,
            infrared_enabled: true,
            color_codec: ColorCodecChoice::default(),
            depth_calibration: None,
        }
    }
}

impl RecorderConfig {
    fn enabled(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Color => self.color_enabled,
            StreamKind::Depth => self.depth_enabled,
            StreamKind::Body => self.body_enabled,
            StreamKind::Infrared => self.infrared_enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    NotStarted,
    Started,
    Stopped,
}

impl RecorderState {
    fn name(self) -> &'static str {
        match self {
            RecorderState::NotStarted => "NotStarted",
            RecorderState::Started => "Started",
            RecorderState::Stopped => "Stopped",
        }
    }
}

/// Capture session writing frame records to a container sink.
pub struct Recorder<W: Write + Send + 'static> {
    config: RecorderConfig,
    state: RecorderState,
    sink: Option<W>,
    queue: Option<mpsc::UnboundedSender<FrameRecord>>,
    cancel: CancellationToken,
    drain: Option<JoinHandle<()>>,
}

impl<W: Write + Send + 'static> Recorder<W> {
    /// Create a recorder over an arbitrary sink. Nothing is written until
    /// [`start`](Self::start).
    pub fn new(sink: W, config: RecorderConfig) -> Self {
        Self {
            config,
            state: RecorderState::NotStarted,
            sink: Some(sink),
            queue: None,
            cancel: CancellationToken::new(),
            drain: None,
        }
    }

    /// Channel and codec configuration; frozen once started.
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Reconfigure before starting. Fails with `InvalidState` once `start()`
    /// has been called.
    pub fn set_config(&mut self, config: RecorderConfig) -> Result<()> {
        if self.state != RecorderState::NotStarted {
            return Err(CaptureError::invalid_state("set_config", self.state.name()));
        }
        self.config = config;
        Ok(())
    }

    /// Write the container metadata and launch the background drain task.
    ///
    /// Must be called inside a tokio runtime. Valid only once; restarting a
    /// stopped recorder fails with `InvalidState`.
    pub fn start(&mut self) -> Result<()> {
        if self.state != RecorderState::NotStarted {
            return Err(CaptureError::invalid_state("start", self.state.name()));
        }
        let mut sink = self.sink.take().ok_or_else(|| {
            CaptureError::invalid_state("start", "sink already consumed")
        })?;

        let mut metadata = ContainerMetadata::new(self.config.color_codec.codec_id());
        metadata.depth_calibration = self.config.depth_calibration.clone();
        metadata.write_to(&mut sink)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let codec = self.config.color_codec.build();
        let cancel = self.cancel.clone();
        self.drain = Some(tokio::spawn(drain_task(sink, rx, codec, cancel)));
        self.queue = Some(tx);
        self.state = RecorderState::Started;
        info!("Recording started (codec id {})", self.config.color_codec.codec_id());
        Ok(())
    }

    /// Enqueue one frame for the drain task. Valid only while started; frames
    /// for disabled channels are ignored.
    pub fn record_frame(&self, record: FrameRecord) -> Result<()> {
        if self.state != RecorderState::Started {
            return Err(CaptureError::invalid_state("record_frame", self.state.name()));
        }
        let kind = record.kind();
        if !self.config.enabled(kind) {
            trace!("Ignoring {kind} frame: channel disabled");
            return Ok(());
        }
        if let Some(queue) = &self.queue {
            if queue.send(record).is_err() {
                warn!("Drain task gone; dropping {kind} frame");
            }
        }
        Ok(())
    }

    /// Record a BGRA color frame captured `relative_time` after session start.
    pub fn record_color(
        &self,
        relative_time: Duration,
        width: i32,
        height: i32,
        pixels: Vec<u8>,
    ) -> Result<()> {
        self.record_frame(FrameRecord::new(
            relative_time,
            FramePayload::Color(ColorFrame {
                width,
                height,
                codec_id: self.config.color_codec.codec_id(),
                data: PixelData::eager(pixels),
            }),
        ))
    }

    /// Record a depth frame.
    pub fn record_depth(&self, relative_time: Duration, frame: DepthFrame) -> Result<()> {
        self.record_frame(FrameRecord::new(relative_time, FramePayload::Depth(frame)))
    }

    /// Record a body frame.
    pub fn record_body(&self, relative_time: Duration, frame: BodyFrame) -> Result<()> {
        self.record_frame(FrameRecord::new(relative_time, FramePayload::Body(frame)))
    }

    /// Record an infrared frame.
    pub fn record_infrared(&self, relative_time: Duration, frame: InfraredFrame) -> Result<()> {
        self.record_frame(FrameRecord::new(relative_time, FramePayload::Infrared(frame)))
    }

    /// Stop recording: drain everything already enqueued, flush, close the
    /// sink, and wait for the drain task to exit. Idempotent; repeated calls
    /// (and stopping a never-started recorder) are no-ops.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == RecorderState::Stopped {
            debug!("Recorder already stopped");
            return Ok(());
        }
        self.state = RecorderState::Stopped;
        // Closing the queue lets the drain task see the end of the FIFO; the
        // token covers the case where the task is idle-waiting.
        self.queue = None;
        self.cancel.cancel();
        if let Some(drain) = self.drain.take() {
            if let Err(e) = drain.await {
                warn!("Drain task terminated abnormally: {e}");
            }
        }
        info!("Recording stopped");
        Ok(())
    }
}

impl<W: Write + Send + 'static> Drop for Recorder<W> {
    fn drop(&mut self) {
        // Dropping without stop() abandons queued frames; the token still
        // lets the drain task exit instead of idling forever.
        self.cancel.cancel();
    }
}

/// Sole consumer of the frame queue and sole writer to the sink.
async fn drain_task<W: Write + Send>(
    mut sink: W,
    mut rx: mpsc::UnboundedReceiver<FrameRecord>,
    codec: Box<dyn ColorCodec>,
    cancel: CancellationToken,
) {
    let mut written = 0u64;
    let mut last_flush = Instant::now();

    loop {
        let record = tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(record) => record,
                // Queue closed by stop(); nothing left to drain.
                None => break,
            },
            _ = cancel.cancelled() => {
                // Stop requested while idle: drain whatever is already queued.
                while let Ok(record) = rx.try_recv() {
                    written += write_frame(&mut sink, codec.as_ref(), record).await as u64;
                }
                break;
            }
        };

        written += write_frame(&mut sink, codec.as_ref(), record).await as u64;

        if last_flush.elapsed() >= FLUSH_INTERVAL {
            if let Err(e) = sink.flush() {
                warn!("Periodic flush failed: {e}");
            }
            last_flush = Instant::now();
        }
    }

    if let Err(e) = sink.flush() {
        warn!("Final flush failed: {e}");
    }
    debug!("Drain task exited after writing {written} frames");
}

/// Encode and write one frame. Failures are logged and the frame dropped so a
/// single damaged frame never ends the session. Returns 1 on success for the
/// drain task's count.
async fn write_frame<W: Write>(sink: &mut W, codec: &dyn ColorCodec, record: FrameRecord) -> u32 {
    let kind = record.kind();
    let relative_time = record.relative_time;
    let result = async {
        let payload = match &record.payload {
            FramePayload::Color(frame) => {
                let pixels = frame.data.bytes()?;
                let encoded = codec.encode(&pixels, frame.width, frame.height).await?;
                writers::serialize_color(&encoded)?
            }
            FramePayload::Depth(frame) => writers::serialize_depth(frame)?,
            FramePayload::Body(frame) => writers::serialize_body(frame)?,
            FramePayload::Infrared(frame) => writers::serialize_infrared(frame)?,
        };
        writers::write_record(sink, kind, relative_time, &payload)?;
        Ok::<_, CaptureError>(())
    }
    .await;

    match result {
        Ok(()) => {
            trace!("Wrote {kind} frame at {relative_time:?}");
            1
        }
        Err(e) => {
            warn!("Dropping {kind} frame at {relative_time:?}: {e}");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Test sink observable after the drain task consumes it.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn body_frame() -> BodyFrame {
        BodyFrame { floor_plane: [0.0; 4], bodies: vec![crate::body::PoseSnapshot::untracked()] }
    }

    #[tokio::test]
    async fn record_before_start_is_invalid() {
        let recorder = Recorder::new(SharedSink::default(), RecorderConfig::default());
        let err = recorder
            .record_body(Duration::ZERO, body_frame())
            .expect_err("recording before start must fail");
        assert!(matches!(err, CaptureError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn start_writes_metadata_first() {
        let sink = SharedSink::default();
        let mut recorder = Recorder::new(sink.clone(), RecorderConfig::default());
        recorder.start().unwrap();
        recorder.stop().await.unwrap();

        let bytes = sink.contents();
        let metadata =
            ContainerMetadata::read_from(&mut std::io::Cursor::new(&bytes)).expect("metadata");
        assert_eq!(metadata.color_codec_id, crate::codec::RAW_CODEC_ID);
    }

    #[tokio::test]
    async fn stop_drains_enqueued_frames() {
        let sink = SharedSink::default();
        let mut recorder = Recorder::new(sink.clone(), RecorderConfig::default());
        recorder.start().unwrap();

        for i in 0..5 {
            recorder.record_body(Duration::from_millis(i * 33), body_frame()).unwrap();
        }
        recorder.stop().await.unwrap();

        let bytes = sink.contents();
        let markers = bytes.windows(5).filter(|w| *w == b"[EOF]").count();
        assert_eq!(markers, 5, "all enqueued frames must be drained before close");
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_terminal() {
        let mut recorder = Recorder::new(SharedSink::default(), RecorderConfig::default());
        recorder.start().unwrap();
        recorder.stop().await.unwrap();
        recorder.stop().await.unwrap();

        let err = recorder.record_body(Duration::ZERO, body_frame()).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidState { .. }));

        let err = recorder.start().unwrap_err();
        assert!(matches!(err, CaptureError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let mut recorder = Recorder::new(SharedSink::default(), RecorderConfig::default());
        recorder.stop().await.unwrap();
        recorder.stop().await.unwrap();
    }

    #[tokio::test]
    async fn config_is_frozen_after_start() {
        let mut recorder = Recorder::new(SharedSink::default(), RecorderConfig::default());
        recorder.set_config(RecorderConfig { depth_enabled: false, ..Default::default() }).unwrap();
        recorder.start().unwrap();

        let err = recorder.set_config(RecorderConfig::default()).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidState { .. }));
        recorder.stop().await.unwrap();
    }

    #[tokio::test]
    async fn disabled_channel_frames_are_ignored() {
        let sink = SharedSink::default();
        let mut recorder = Recorder::new(
            sink.clone(),
            RecorderConfig { body_enabled: false, ..Default::default() },
        );
        recorder.start().unwrap();
        recorder.record_body(Duration::ZERO, body_frame()).unwrap();
        recorder.stop().await.unwrap();

        let bytes = sink.contents();
        assert_eq!(bytes.windows(5).filter(|w| *w == b"[EOF]").count(), 0);
    }
}
