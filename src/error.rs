//! Error types for capture and replay.
//!
//! All fallible operations in the crate return [`CaptureError`] through the
//! [`Result`] alias. The taxonomy follows the failure surfaces of the engine:
//!
//! - **InvalidState**: API misuse against the recorder/replay state machine
//! - **Encoding**: a codec was handed malformed dimensions or buffers
//! - **CorruptPayload**: decode of truncated or garbled payload bytes
//! - **CorruptFile**: the frame integrity marker is missing at both the
//!   primary and the resynchronized position
//! - **File**: I/O failures with path context
//! - **Parse**: structural problems in the container (unreadable metadata,
//!   unknown stream tags, short reads)
//!
//! Per-frame failures during recording are logged and dropped by the pipeline
//! rather than surfaced here; only structural and state-machine failures reach
//! the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for capture and replay operations.
pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

/// Main error type for capture and replay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CaptureError {
    #[error("Invalid state for {operation}: {state}")]
    InvalidState { operation: String, state: String },

    #[error("Encoding failed: {details}")]
    Encoding { details: String },

    #[error("Corrupt payload: {details}")]
    CorruptPayload { details: String },

    #[error("Corrupt container file: {details}")]
    CorruptFile { details: String },

    #[error("Container file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },
}

impl CaptureError {
    /// Helper constructor for state-machine violations.
    pub fn invalid_state(operation: impl Into<String>, state: impl Into<String>) -> Self {
        CaptureError::InvalidState { operation: operation.into(), state: state.into() }
    }

    /// Helper constructor for codec input failures.
    pub fn encoding(details: impl Into<String>) -> Self {
        CaptureError::Encoding { details: details.into() }
    }

    /// Helper constructor for payload decode failures.
    pub fn corrupt_payload(details: impl Into<String>) -> Self {
        CaptureError::CorruptPayload { details: details.into() }
    }

    /// Helper constructor for unrecoverable container corruption.
    pub fn corrupt_file(details: impl Into<String>) -> Self {
        CaptureError::CorruptFile { details: details.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        CaptureError::File { path, source }
    }

    /// Helper constructor for container structure errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        CaptureError::Parse { context: context.into(), details: details.into() }
    }

    /// Whether this error invalidates only a single frame, as opposed to the
    /// whole load or session. The replay loader drops frames whose payloads
    /// fail to decode; everything else aborts the operation that raised it.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, CaptureError::CorruptPayload { .. })
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}
