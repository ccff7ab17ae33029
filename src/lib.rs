//! Capture and playback engine for multi-channel sensor streams.
//!
//! Streamcorder records time-stamped frames from four sensor channels
//! (color, depth, infrared, and articulated body pose) into a single
//! container file, and plays such files back with the original timing.
//!
//! # Features
//!
//! - **Recording**: producers enqueue frames without waiting on encode or
//!   write latency; a background task owns the output sink
//! - **Bit-exact container**: self-describing little-endian records with a
//!   per-frame integrity marker, resilient to single-frame corruption
//! - **Replay**: per-stream indexes, lazy pixel materialization, a 30 Hz
//!   drift-corrected scheduler, and scrubbing to arbitrary locations
//! - **Color codecs**: raw BGRA passthrough or JPEG compression, with
//!   optional resize on the encode path
//!
//! # Example
//!
//! ```rust,no_run
//! use streamcorder::{RecorderConfig, Streamcorder, StreamKind};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> streamcorder::Result<()> {
//!     // Record a session
//!     let mut recorder = Streamcorder::record("session.xef", RecorderConfig::default())?;
//!     recorder.start()?;
//!     recorder.record_color(Duration::ZERO, 4, 4, vec![0u8; 64])?;
//!     recorder.stop().await?;
//!
//!     // Play it back
//!     let mut replay = Streamcorder::open("session.xef")?;
//!     let mut frames = replay.subscribe(StreamKind::Color);
//!     replay.start();
//!     frames.changed().await.ok();
//!     if let Some(frame) = frames.borrow().as_ref() {
//!         println!("color frame at {:?}", frame.relative_time);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
pub mod types;

// Storage format and codecs
pub mod codec;
pub mod container;

// Capture and playback pipelines
pub mod record;
pub mod replay;

// Core exports
pub use error::*;
pub use types::*;

// Body-pose vocabulary
pub use types::body;

// Main API exports
pub use codec::{ColorCodecChoice, Resize, ResizeFilter};
pub use record::{Recorder, RecorderConfig};
pub use replay::{FrameSlot, Replay, StreamIndex};

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Unified entry point for capture and playback sessions.
///
/// The factory covers the common case of recording to and replaying from a
/// file path. For arbitrary sinks and sources, use [`Recorder::new`] and
/// [`Replay::from_source`] directly.
pub struct Streamcorder;

impl Streamcorder {
    /// Create a recorder writing to a new container file.
    ///
    /// The file is created immediately; nothing is written until
    /// [`Recorder::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn record<P: AsRef<Path>>(
        path: P,
        config: RecorderConfig,
    ) -> Result<Recorder<BufWriter<File>>> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| CaptureError::file_error(path.into(), e))?;
        Ok(Recorder::new(BufWriter::new(file), config))
    }

    /// Open a container file for playback.
    ///
    /// Parses and indexes the whole container up front; pixel payloads stay
    /// in the file and are read on first access.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the metadata header is
    /// invalid or of an unsupported version, or the record structure is
    /// unrecoverably corrupt.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Replay> {
        Replay::open(path)
    }
}
