use crate::core::{PlayerError, Result};
use crate::player::backend::{AudioCallback, AudioDevice, AudioStream};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, info, warn};

/// cpal 默认输出设备
pub struct CpalAudioDevice;

/// 已打开的 cpal 输出流
struct CpalStream {
    stream: Stream,
}

// cpal::Stream 本身不是 Send，但它只由 AudioEngine 持有，
// 播放控制在 PlaybackManager 中串行调用，不会并发访问
unsafe impl Send for CpalStream {}

impl CpalAudioDevice {
    pub fn new() -> Self {
        Self
    }

    fn default_device() -> Result<Device> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioDevice("无法找到音频输出设备".to_string()))?;
        debug!("使用音频设备: {}", device.name().unwrap_or_default());
        Ok(device)
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        let channels_match = config.channels == supported.channels();

        rate_in_range && channels_match
    }

    fn supports(device: &Device, config: &StreamConfig) -> Result<bool> {
        let supported_configs = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioDevice(format!("无法获取支持的音频配置: {}", e)))?;
        Ok(supported_configs
            .into_iter()
            .any(|supported| Self::is_config_compatible(config, &supported)))
    }

    fn stream_config(sample_rate: u32, channels: u16) -> StreamConfig {
        StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

impl Default for CpalAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for CpalAudioDevice {
    /// 协商输出配置（支持非标准配置自动回退）
    fn negotiate(&self, sample_rate: u32, channels: u16) -> Result<(u32, u16)> {
        info!("协商音频输出: {} Hz, {} 声道", sample_rate, channels);
        let device = Self::default_device()?;

        if Self::supports(&device, &Self::stream_config(sample_rate, channels))? {
            return Ok((sample_rate, channels));
        }

        warn!("⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置", sample_rate, channels);

        let fallback_configs = [
            (48000, 2),  // 最常见
            (44100, 2),  // CD 音质
            (48000, 1),  // 单声道高质量
            (44100, 1),  // 单声道 CD 质量
            (sample_rate, 2),
        ];

        for (fb_rate, fb_channels) in fallback_configs {
            if Self::supports(&device, &Self::stream_config(fb_rate, fb_channels))? {
                info!("✅ 使用回退配置: {} Hz, {} 声道", fb_rate, fb_channels);
                return Ok((fb_rate, fb_channels));
            }
        }

        Err(PlayerError::AudioDevice(format!(
            "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
            sample_rate, channels
        )))
    }

    fn open_stream(
        &self,
        sample_rate: u32,
        channels: u16,
        mut callback: AudioCallback,
    ) -> Result<Box<dyn AudioStream>> {
        let device = Self::default_device()?;
        let config = Self::stream_config(sample_rate, channels);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback(data),
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioDevice(format!("创建音频流失败: {}", e)))?;

        info!("音频输出流已创建: {} Hz, {} 声道", sample_rate, channels);
        Ok(Box::new(CpalStream { stream }))
    }
}

impl AudioStream for CpalStream {
    fn play(&mut self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| PlayerError::AudioDevice(format!("启动音频流失败: {}", e)))
    }

    fn pause(&mut self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| PlayerError::AudioDevice(format!("暂停音频流失败: {}", e)))
    }
}
