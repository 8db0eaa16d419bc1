use crate::core::{Bitmap, MediaInfo, PcmData, Result, StreamDescriptor, StreamKind};
use std::path::Path;

/// 解码器借出的视频帧（RGBA）
///
/// 只在解码回调内有效，后端推进到下一帧前必须用 `to_bitmap` 拷贝出来。
pub struct FrameRef<'a> {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub data: &'a [u8],
    pub pts: Option<f64>,
}

impl FrameRef<'_> {
    /// 复制到连续内存
    pub fn to_bitmap(&self) -> Bitmap {
        let row_size = self.width as usize * 4;
        let mut data = vec![0u8; row_size * self.height as usize];

        for y in 0..self.height as usize {
            let src_offset = y * self.stride;
            let dst_offset = y * row_size;
            data[dst_offset..dst_offset + row_size]
                .copy_from_slice(&self.data[src_offset..src_offset + row_size]);
        }

        Bitmap::new(self.width, self.height, data)
    }
}

/// 单个数据包的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    /// 视频包已解码，输出了 n 帧（可能为 0）
    Decoded(usize),
    /// 非视频包，已跳过
    Skipped,
    /// 到达文件末尾
    EndOfStream,
}

/// 媒体源抽象接口（一个打开的容器）
///
/// 所有调用都是同步阻塞的；同一个实例不允许并发调用，
/// 由调用方通过编解码锁串行化。
pub trait MediaSource: Send {
    /// 流描述
    fn streams(&self) -> &[StreamDescriptor];

    /// 总时长（秒）
    fn duration(&self) -> f64;

    /// 粗略 seek 到指定位置（秒），落在之前最近的关键帧
    fn seek(&mut self, seconds: f64) -> Result<()>;

    /// 清空解码器内部缓冲
    fn flush(&mut self);

    /// 读取下一个视频包并解码，每个输出帧交给 `sink`
    ///
    /// 单包解码失败返回瞬时错误（`PlayerError::is_transient`），
    /// 容器读取失败返回不可恢复错误。
    fn decode_next_packet(&mut self, sink: &mut dyn FnMut(FrameRef<'_>)) -> Result<PacketOutcome>;

    /// 一次性完整解码音频，重采样到目标格式；没有音频流时返回 None
    fn decode_audio(&mut self, sample_rate: u32, channels: u16) -> Result<Option<PcmData>>;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;

    fn video_stream(&self) -> Option<&StreamDescriptor> {
        self.streams().iter().find(|s| s.kind == StreamKind::Video)
    }

    fn audio_stream(&self) -> Option<&StreamDescriptor> {
        self.streams().iter().find(|s| s.kind == StreamKind::Audio)
    }

    fn media_info(&self) -> MediaInfo {
        let mut info = MediaInfo {
            duration: self.duration(),
            audio_codec: "none".to_string(),
            ..MediaInfo::default()
        };
        if let Some(video) = self.video_stream() {
            info.width = video.width;
            info.height = video.height;
            info.fps = video.frame_rate;
            info.video_codec = video.codec.clone();
        }
        if let Some(audio) = self.audio_stream() {
            info.audio_codec = audio.codec.clone();
            info.sample_rate = audio.sample_rate;
            info.channels = audio.channels;
        }
        info
    }
}

/// 编解码后端：负责打开容器
pub trait CodecBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>>;
}

/// 音频设备回调：填充交错 f32 缓冲区，必须在设备期限内返回
pub type AudioCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// 已打开的音频输出流
pub trait AudioStream: Send {
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
}

/// 音频设备后端
pub trait AudioDevice: Send + Sync {
    /// 协商实际使用的输出配置（设备不支持时回退）
    fn negotiate(&self, sample_rate: u32, channels: u16) -> Result<(u32, u16)>;

    fn open_stream(
        &self,
        sample_rate: u32,
        channels: u16,
        callback: AudioCallback,
    ) -> Result<Box<dyn AudioStream>>;
}

/// 显示表面：由显示端自己的节奏调用，不在渲染线程中调用
pub trait DisplaySurface {
    fn present(&mut self, bitmap: &Bitmap, width: u32, height: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ref_copies_rows_without_padding() {
        // 2x2 RGBA，每行带 4 字节填充
        let mut data = Vec::new();
        data.extend_from_slice(&[1, 1, 1, 1, 2, 2, 2, 2, 0, 0, 0, 0]);
        data.extend_from_slice(&[3, 3, 3, 3, 4, 4, 4, 4, 0, 0, 0, 0]);
        let frame = FrameRef {
            width: 2,
            height: 2,
            stride: 12,
            data: &data,
            pts: Some(0.5),
        };
        let bitmap = frame.to_bitmap();
        assert_eq!(bitmap.data.len(), 16);
        assert_eq!(&bitmap.data[4..8], &[2, 2, 2, 2]);
        assert_eq!(&bitmap.data[8..12], &[3, 3, 3, 3]);
    }
}
