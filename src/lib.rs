//! 本地文件音视频同步播放引擎
//!
//! 解码线程把视频帧推入有界帧队列，渲染线程以音频为主时钟计算漂移，
//! 决定丢弃、等待或显示，显示端从小容量的显示队列中按自己的节奏取帧。

pub mod core;
pub mod player;

pub use crate::core::{PlayerConfig, PlayerError, PlayerEvent, Result, TransportState};
pub use crate::player::PlaybackManager;
