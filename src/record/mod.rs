//! Recording pipeline: per-channel serializers and the queued writer.

mod recorder;
pub(crate) mod writers;

pub use recorder::{Recorder, RecorderConfig};
