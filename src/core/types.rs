use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};

/// 传输状态
///
/// Seeking 只是过渡状态，总会回到进入它之前的 Playing 或 Paused。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Idle,
    Loaded,
    Playing,
    Paused,
    Seeking,
}

impl TransportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::Idle => "Idle",
            TransportState::Loaded => "Loaded",
            TransportState::Playing => "Playing",
            TransportState::Paused => "Paused",
            TransportState::Seeking => "Seeking",
        }
    }
}

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
}

/// 流描述信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: StreamKind,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub time_base: f64,
}

impl StreamDescriptor {
    /// 单帧时长（秒），帧率未知时按 30fps 估算
    pub fn frame_duration(&self) -> f64 {
        if self.frame_rate > 0.0 {
            1.0 / self.frame_rate
        } else {
            1.0 / 30.0
        }
    }
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64,          // 总时长（秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// RGBA 位图（持有像素数据）
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height * 4) as usize);
        Self { width, height, data }
    }

    /// 纯色位图
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self { width, height, data }
    }

    /// 等比缩放以适配目标区域；尺寸已满足时原样返回
    pub fn scale_to_fit(self, max_width: u32, max_height: u32) -> Bitmap {
        if max_width == 0 || max_height == 0 || self.width == 0 || self.height == 0 {
            return self;
        }
        let (w, h) = fit_dimensions(self.width, self.height, max_width, max_height);
        if w == self.width && h == self.height {
            return self;
        }

        let (src_w, src_h) = (self.width, self.height);
        match RgbaImage::from_raw(src_w, src_h, self.data) {
            Some(img) => {
                let resized = imageops::resize(&img, w, h, imageops::FilterType::Triangle);
                Bitmap {
                    width: w,
                    height: h,
                    data: resized.into_raw(),
                }
            }
            // 缓冲区长度与尺寸不符，无法缩放
            None => Bitmap {
                width: 0,
                height: 0,
                data: Vec::new(),
            },
        }
    }
}

/// 计算等比适配尺寸（至少 1x1）
pub fn fit_dimensions(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let scale = (max_w as f64 / src_w as f64).min(max_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, max_w);
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, max_h);
    (w, h)
}

/// 已解码的视频帧
///
/// 所有权随队列转移，同一时刻只有一个持有者。
#[derive(Debug)]
pub struct DecodedFrame {
    pub bitmap: Bitmap,
    pub pts: f64,       // 显示时间戳（秒）
    pub seq: u64,       // 会话内的帧序号
    pub epoch: u64,     // 解码时所处的 seek 代数
}

/// 完整解码的 PCM 数据（交错 f32）
#[derive(Debug, Clone, Default)]
pub struct PcmData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmData {
    /// 帧数（每帧包含 channels 个采样）
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }
}

/// 漂移采样（仅用于诊断）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftSample {
    pub at: f64,            // 会话开始后的墙钟时间（秒）
    pub audio_clock: f64,
    pub frame_pts: f64,
    pub drift: f64,
}

/// 播放统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStats {
    pub decoded_frames: u64,
    pub enqueued_frames: u64,
    /// 帧队列写入超时丢弃
    pub dropped_frames: u64,
    /// seek 过滤丢弃
    pub discarded_frames: u64,
    pub presented_frames: u64,
    pub late_drops: u64,
    pub early_drops: u64,
    pub display_full_drops: u64,
    pub stale_drops: u64,
}

/// 播放器事件（观察者通道）
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(TransportState),
    TimeChanged(f64),
    Seeked(f64),
    EndOfStream,
    AudioDegraded(String),
    Error(String),
}
