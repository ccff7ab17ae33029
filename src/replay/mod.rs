//! Replay pipeline: container loading, per-stream indexing, and the playback
//! scheduler.

mod index;
mod loader;
mod player;

pub use index::StreamIndex;
pub use player::{FrameSlot, Replay};
