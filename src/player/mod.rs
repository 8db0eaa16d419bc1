// 播放器核心模块

pub mod backend;
pub mod control;
pub mod events;
pub mod audio_engine;
pub mod frame_decode;
pub mod sync_render;
pub mod manager;
pub mod synthetic;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_source;
#[cfg(feature = "cpal")]
pub mod audio_output;

pub use backend::{AudioDevice, AudioStream, CodecBackend, DisplaySurface, FrameRef, MediaSource};
pub use audio_engine::AudioEngine;
pub use control::ControlFlags;
pub use events::EventBus;
pub use frame_decode::{DecoderSignal, FrameDecoder};
pub use sync_render::{decide, DisplayPoller, SyncDecision, SyncRenderer, SyncThresholds};
pub use manager::PlaybackManager;
pub use synthetic::{SyntheticBackend, SyntheticMedia, VirtualAudioDevice};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_source::FfmpegBackend;
#[cfg(feature = "cpal")]
pub use audio_output::CpalAudioDevice;

use std::process;
use std::thread;

pub(crate) fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}
