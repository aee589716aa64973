//! Audio capture, playback scheduling and sample conversion.

pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod device;
pub mod pcm;
pub mod playback;

pub use capture::{AudioInput, CapturePipeline, ChunkFramer, OutboundChunk};
pub use playback::{AudioOutput, PlaybackPipeline, PlaybackSchedule, ScheduledChunk, SourceId};
