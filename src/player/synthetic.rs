//! 合成媒体后端与虚拟音频设备
//!
//! 不依赖 FFmpeg 和声卡，按真实时间节奏驱动整个播放链路，
//! 用于集成测试和演示程序的 `--synthetic` 模式。

use crate::core::{Bitmap, PcmData, PlayerError, Result, StreamDescriptor, StreamKind};
use crate::player::backend::{
    AudioCallback, AudioDevice, AudioStream, CodecBackend, FrameRef, MediaSource, PacketOutcome,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 合成媒体描述
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    pub duration: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// (采样率, 声道数)，None 表示没有音频流
    pub audio: Option<(u32, u16)>,
    /// 音轨时长，None 表示与视频等长
    pub audio_duration: Option<f64>,
    /// 关键帧间隔（帧），seek 会落到之前最近的关键帧
    pub gop: u64,
    /// 每 n 个包出现一次可恢复的解码错误
    pub corrupt_every: Option<u64>,
    /// 读到第 n 个包时容器读取失败
    pub fail_at_packet: Option<u64>,
    /// 每个包的解码耗时
    pub decode_cost: Duration,
}

impl SyntheticMedia {
    /// 指定时长和帧率的视频，带单声道 16kHz 音频
    pub fn new(duration: f64, fps: f64) -> Self {
        Self {
            duration,
            fps,
            width: 32,
            height: 18,
            audio: Some((16000, 1)),
            audio_duration: None,
            gop: 12,
            corrupt_every: None,
            fail_at_packet: None,
            decode_cost: Duration::ZERO,
        }
    }

    pub fn without_audio(mut self) -> Self {
        self.audio = None;
        self
    }

    pub fn total_frames(&self) -> u64 {
        (self.duration * self.fps).round() as u64
    }
}

/// 帧序号编码进纯色像素，缩放后仍可还原
pub fn frame_color(index: u64) -> [u8; 4] {
    [
        (index & 0xff) as u8,
        ((index >> 8) & 0xff) as u8,
        ((index >> 16) & 0xff) as u8,
        255,
    ]
}

/// 从合成帧位图中还原帧序号
pub fn frame_index(bitmap: &Bitmap) -> Option<u64> {
    let px = bitmap.data.get(0..4)?;
    Some(px[0] as u64 | (px[1] as u64) << 8 | (px[2] as u64) << 16)
}

/// 合成编解码后端：按路径注册媒体
#[derive(Default)]
pub struct SyntheticBackend {
    media: Mutex<HashMap<PathBuf, SyntheticMedia>>,
    opens: AtomicUsize,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media(self, path: impl Into<PathBuf>, media: SyntheticMedia) -> Self {
        self.media.lock().insert(path.into(), media);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl CodecBackend for SyntheticBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let media = self.media.lock().get(path).cloned();
        match media {
            Some(media) => Ok(Box::new(SyntheticSource::new(path, media))),
            None if path.extension().map_or(false, |ext| ext == "txt") => Err(
                PlayerError::InvalidFormat(path.display().to_string()),
            ),
            None => Err(PlayerError::NotFound(path.display().to_string())),
        }
    }
}

/// 合成媒体源
pub struct SyntheticSource {
    path: PathBuf,
    media: SyntheticMedia,
    streams: Vec<StreamDescriptor>,
    next_frame: u64,
    packets_read: u64,
    scratch: Vec<u8>,
}

impl SyntheticSource {
    pub fn new(path: &Path, media: SyntheticMedia) -> Self {
        let mut streams = vec![StreamDescriptor {
            index: 0,
            kind: StreamKind::Video,
            codec: "synthetic".to_string(),
            width: media.width,
            height: media.height,
            frame_rate: media.fps,
            sample_rate: 0,
            channels: 0,
            time_base: 1.0 / media.fps,
        }];
        if let Some((sample_rate, channels)) = media.audio {
            streams.push(StreamDescriptor {
                index: 1,
                kind: StreamKind::Audio,
                codec: "pcm_f32".to_string(),
                width: 0,
                height: 0,
                frame_rate: 0.0,
                sample_rate,
                channels,
                time_base: 1.0 / sample_rate as f64,
            });
        }

        Self {
            path: path.to_path_buf(),
            scratch: Vec::with_capacity((media.width * media.height * 4) as usize),
            media,
            streams,
            next_frame: 0,
            packets_read: 0,
        }
    }
}

impl MediaSource for SyntheticSource {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn duration(&self) -> f64 {
        self.media.duration
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let frame = (seconds.max(0.0) * self.media.fps).floor() as u64;
        let gop = self.media.gop.max(1);
        self.next_frame = (frame / gop * gop).min(self.media.total_frames());
        Ok(())
    }

    fn flush(&mut self) {}

    fn decode_next_packet(&mut self, sink: &mut dyn FnMut(FrameRef<'_>)) -> Result<PacketOutcome> {
        self.packets_read += 1;
        if let Some(n) = self.media.fail_at_packet {
            if self.packets_read >= n {
                return Err(PlayerError::ContainerIo("合成容器读取失败".to_string()));
            }
        }
        if self.next_frame >= self.media.total_frames() {
            return Ok(PacketOutcome::EndOfStream);
        }

        let index = self.next_frame;
        self.next_frame += 1;

        if !self.media.decode_cost.is_zero() {
            thread::sleep(self.media.decode_cost);
        }
        if let Some(n) = self.media.corrupt_every {
            if n > 0 && self.packets_read % n == 0 {
                return Err(PlayerError::Decode(format!("合成坏包 #{}", index)));
            }
        }

        let color = frame_color(index);
        self.scratch.clear();
        for _ in 0..(self.media.width * self.media.height) {
            self.scratch.extend_from_slice(&color);
        }
        sink(FrameRef {
            width: self.media.width,
            height: self.media.height,
            stride: self.media.width as usize * 4,
            data: &self.scratch,
            pts: Some(index as f64 / self.media.fps),
        });
        Ok(PacketOutcome::Decoded(1))
    }

    fn decode_audio(&mut self, sample_rate: u32, channels: u16) -> Result<Option<PcmData>> {
        if self.media.audio.is_none() {
            return Ok(None);
        }
        let duration = self.media.audio_duration.unwrap_or(self.media.duration);
        let frames = (duration * sample_rate as f64).round() as usize;
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for i in 0..frames {
            let t = i as f64 / sample_rate as f64;
            let value = (t * 440.0 * std::f64::consts::TAU).sin() as f32 * 0.2;
            for _ in 0..channels {
                samples.push(value);
            }
        }
        Ok(Some(PcmData {
            samples,
            sample_rate,
            channels,
        }))
    }

    fn description(&self) -> String {
        format!("Synthetic: {}", self.path.display())
    }
}

/// 虚拟音频设备统计
#[derive(Debug, Default)]
pub struct VirtualDeviceStats {
    pub opens: AtomicUsize,
    pub plays: AtomicUsize,
    pub pauses: AtomicUsize,
    pub callbacks: AtomicUsize,
}

/// 虚拟音频设备：后台线程按墙钟节奏调用回调
pub struct VirtualAudioDevice {
    fail_negotiate: bool,
    fail_open: bool,
    period: Duration,
    stats: Arc<VirtualDeviceStats>,
}

impl VirtualAudioDevice {
    pub fn new() -> Self {
        Self {
            fail_negotiate: false,
            fail_open: false,
            period: Duration::from_millis(10),
            stats: Arc::new(VirtualDeviceStats::default()),
        }
    }

    /// 协商阶段即失败（没有可用设备）
    pub fn unavailable() -> Self {
        Self {
            fail_negotiate: true,
            ..Self::new()
        }
    }

    /// 协商成功但打开流失败
    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    pub fn stats(&self) -> Arc<VirtualDeviceStats> {
        self.stats.clone()
    }
}

impl Default for VirtualAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for VirtualAudioDevice {
    fn negotiate(&self, sample_rate: u32, channels: u16) -> Result<(u32, u16)> {
        if self.fail_negotiate {
            return Err(PlayerError::AudioDevice("虚拟设备不可用".to_string()));
        }
        Ok((sample_rate, channels))
    }

    fn open_stream(
        &self,
        sample_rate: u32,
        channels: u16,
        callback: AudioCallback,
    ) -> Result<Box<dyn AudioStream>> {
        if self.fail_open {
            return Err(PlayerError::AudioDevice("虚拟设备打开失败".to_string()));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(VirtualStream::spawn(
            sample_rate,
            channels,
            self.period,
            callback,
            self.stats.clone(),
        )))
    }
}

struct Pacer {
    started: Option<Instant>,
    delivered: u64,
}

struct VirtualStream {
    pacer: Arc<Mutex<Pacer>>,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<VirtualDeviceStats>,
}

impl VirtualStream {
    fn spawn(
        sample_rate: u32,
        channels: u16,
        period: Duration,
        mut callback: AudioCallback,
        stats: Arc<VirtualDeviceStats>,
    ) -> Self {
        let pacer = Arc::new(Mutex::new(Pacer {
            started: None,
            delivered: 0,
        }));
        let running = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let (thread_pacer, thread_running, thread_stop, thread_stats) =
            (pacer.clone(), running.clone(), stop.clone(), stats.clone());
        let handle = thread::spawn(move || {
            let mut buffer = Vec::new();
            while !thread_stop.load(Ordering::SeqCst) {
                if thread_running.load(Ordering::SeqCst) {
                    let frames = {
                        let mut pacer = thread_pacer.lock();
                        let started = *pacer.started.get_or_insert_with(Instant::now);
                        let due = (started.elapsed().as_secs_f64() * sample_rate as f64) as u64;
                        let frames = due.saturating_sub(pacer.delivered);
                        pacer.delivered = due;
                        frames as usize
                    };
                    if frames > 0 {
                        buffer.resize(frames * channels as usize, 0.0);
                        callback(&mut buffer);
                        thread_stats.callbacks.fetch_add(1, Ordering::Relaxed);
                    }
                }
                thread::sleep(period);
            }
        });

        Self {
            pacer,
            running,
            stop,
            handle: Some(handle),
            stats,
        }
    }
}

impl AudioStream for VirtualStream {
    fn play(&mut self) -> Result<()> {
        {
            let mut pacer = self.pacer.lock();
            pacer.started = None;
            pacer.delivered = 0;
        }
        self.running.store(true, Ordering::SeqCst);
        self.stats.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.stats.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
