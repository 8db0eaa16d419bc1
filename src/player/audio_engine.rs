use crate::core::{MasterClock, PcmData, PlayerError, Result};
use crate::player::backend::{AudioDevice, AudioStream};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 完整解码的音频缓冲区
///
/// 读游标是设备回调和 seek 唯一共同修改的字段，单独加锁。
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    cursor: Mutex<Cursor>,
}

struct Cursor {
    position: f64,  // 帧位置（可带小数，用于变速）
    rate: f64,
    volume: f32,
}

impl AudioBuffer {
    fn new(pcm: PcmData) -> Self {
        Self {
            samples: pcm.samples,
            sample_rate: pcm.sample_rate.max(1),
            channels: pcm.channels.max(1),
            cursor: Mutex::new(Cursor {
                position: 0.0,
                rate: 1.0,
                volume: 1.0,
            }),
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn current_time(&self) -> f64 {
        self.cursor.lock().position / self.sample_rate as f64
    }

    /// 游标只钳制下界；越过音频末尾时照常计时，回调输出静音
    fn seek(&self, time: f64) {
        self.cursor.lock().position = time.max(0.0) * self.sample_rate as f64;
    }

    /// 设备回调主体：从游标处复制样本，越界补零，推进游标
    fn render(&self, out: &mut [f32], playing: bool) {
        if !playing {
            out.fill(0.0);
            return;
        }

        let channels = self.channels as usize;
        let total = self.frames();
        let mut cursor = self.cursor.lock();
        let (rate, volume) = (cursor.rate, cursor.volume);
        let mut position = cursor.position;

        for frame in out.chunks_mut(channels) {
            let index = position as usize;
            if index < total {
                let base = index * channels;
                for (channel, sample) in frame.iter_mut().enumerate() {
                    *sample = self.samples[base + channel] * volume;
                }
            } else {
                frame.fill(0.0);
            }
            position += rate;
        }

        cursor.position = position;
    }
}

/// 音频时钟：游标 / 采样率
struct AudioClock(Arc<AudioBuffer>);

impl MasterClock for AudioClock {
    fn now(&self) -> f64 {
        self.0.current_time()
    }
}

/// 音频输出引擎 - 持有权威播放时钟
pub struct AudioEngine {
    device: Arc<dyn AudioDevice>,
    buffer: Option<Arc<AudioBuffer>>,
    playing: Arc<AtomicBool>,
    stream: Option<Box<dyn AudioStream>>,
    /// 设备流是否处于运行状态（与 `playing` 不同，静音保持时流仍在运行）
    streaming: bool,
}

impl AudioEngine {
    pub fn new(device: Arc<dyn AudioDevice>) -> Self {
        Self {
            device,
            buffer: None,
            playing: Arc::new(AtomicBool::new(false)),
            stream: None,
            streaming: false,
        }
    }

    /// 载入完整解码的 PCM 数据
    pub fn load(&mut self, pcm: PcmData) {
        self.stop();
        info!(
            "🔊 载入音频: {} 帧, {} Hz, {} 声道 ({:.2}s)",
            pcm.frames(),
            pcm.sample_rate,
            pcm.channels,
            pcm.duration()
        );
        self.buffer = Some(Arc::new(AudioBuffer::new(pcm)));
    }

    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// 开始播放（首次调用时打开设备流）
    pub fn play(&mut self) -> Result<()> {
        self.prime()?;
        self.playing.store(true, Ordering::SeqCst);
        info!("🔊 音频播放");
        Ok(())
    }

    /// 打开并启动设备流，但保持静音、游标不动，直到播放标志置位
    pub fn prime(&mut self) -> Result<()> {
        let buffer = self
            .buffer
            .clone()
            .ok_or_else(|| PlayerError::AudioDevice("没有载入音频数据".to_string()))?;

        if self.stream.is_none() {
            let playing = self.playing.clone();
            let callback_buffer = buffer.clone();
            let stream = self.device.open_stream(
                buffer.sample_rate(),
                buffer.channels(),
                Box::new(move |out: &mut [f32]| {
                    callback_buffer.render(out, playing.load(Ordering::Relaxed));
                }),
            )?;
            self.stream = Some(stream);
            debug!("🔊 音频流已打开");
        }

        if !self.streaming {
            if let Some(stream) = self.stream.as_mut() {
                stream.play()?;
            }
            self.streaming = true;
        }
        Ok(())
    }

    /// 静音保持：设备流继续运行，时钟冻结在当前位置
    pub fn hold(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    /// 暂停（已暂停时不重复操作设备）
    pub fn pause(&mut self) {
        self.playing.store(false, Ordering::SeqCst);
        if !self.streaming {
            return;
        }
        self.streaming = false;
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.pause() {
                warn!("⚠️ 暂停音频流失败: {}", e);
            }
        }
        info!("🔊 音频暂停");
    }

    /// 停止并释放设备流
    pub fn stop(&mut self) {
        self.playing.store(false, Ordering::SeqCst);
        self.streaming = false;
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("🔊 音频输出已停止");
        }
    }

    /// 跳转，负值钳制为 0
    pub fn seek(&self, time: f64) {
        if let Some(buffer) = &self.buffer {
            buffer.seek(time);
            debug!("🔊 音频游标跳转到 {:.3}s", buffer.current_time());
        }
    }

    /// 主时钟读数（秒）
    pub fn get_current_time(&self) -> f64 {
        self.buffer.as_ref().map(|b| b.current_time()).unwrap_or(0.0)
    }

    pub fn set_rate(&self, rate: f64) {
        if let Some(buffer) = &self.buffer {
            buffer.cursor.lock().rate = rate;
        }
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        if let Some(buffer) = &self.buffer {
            buffer.cursor.lock().volume = volume.clamp(0.0, 1.0);
        }
    }

    /// 回调读取的播放标志；置为 false 时设备只输出静音，时钟冻结，
    /// 置为 true 时从游标处继续输出
    pub fn playing_flag(&self) -> Arc<AtomicBool> {
        self.playing.clone()
    }

    /// 供渲染引擎使用的时钟句柄
    pub fn clock(&self) -> Option<Arc<dyn MasterClock>> {
        self.buffer
            .as_ref()
            .map(|b| Arc::new(AudioClock(b.clone())) as Arc<dyn MasterClock>)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
