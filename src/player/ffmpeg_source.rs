use crate::core::{PcmData, PlayerError, Result, StreamDescriptor, StreamKind};
use crate::player::backend::{CodecBackend, FrameRef, MediaSource, PacketOutcome};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, software, util};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// FFmpeg 微秒时间基
const AV_TIME_BASE: f64 = 1_000_000.0;

/// FFmpeg 编解码后端
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// 初始化 FFmpeg
    pub fn new() -> Result<Self> {
        ffmpeg::init()?;
        info!("✅ FFmpeg 初始化成功");
        Ok(Self)
    }
}

impl CodecBackend for FfmpegBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>> {
        Ok(Box::new(FfmpegSource::open(path)?))
    }
}

type ScalerKey = (util::format::Pixel, u32, u32);

/// FFmpeg 媒体源：解封装 + 视频解码 + RGBA 转换
pub struct FfmpegSource {
    path: PathBuf,
    input: format::context::Input,
    video_index: usize,
    decoder: codec::decoder::Video,
    scaler: Option<(ScalerKey, software::scaling::Context)>,
    time_base: f64,
    streams: Vec<StreamDescriptor>,
    duration: f64,
    draining: bool,
}

// SwsContext 本身不是 Send，但 FfmpegSource 总是在编解码锁内被单线程使用
unsafe impl Send for FfmpegSource {}

fn rational(r: ffmpeg::Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        r.numerator() as f64 / r.denominator() as f64
    }
}

fn open_input(path: &Path) -> Result<format::context::Input> {
    if !path.exists() {
        return Err(PlayerError::NotFound(path.display().to_string()));
    }
    format::input(&path).map_err(|e| match e {
        ffmpeg::Error::InvalidData | ffmpeg::Error::DemuxerNotFound => {
            PlayerError::InvalidFormat(format!("{}: {}", path.display(), e))
        }
        _ => PlayerError::Unknown(format!("无法打开文件 {}: {}", path.display(), e)),
    })
}

impl FfmpegSource {
    /// 打开媒体文件
    pub fn open(path: &Path) -> Result<Self> {
        info!("正在打开文件: {}", path.display());
        let input = open_input(path)?;

        let mut streams = Vec::new();

        let (video_index, time_base, decoder) = {
            let stream = input
                .streams()
                .best(media::Type::Video)
                .ok_or(PlayerError::NoVideoStream)?;
            let params = stream.parameters();
            let codec_name = params.id().name().to_string();
            let decoder = codec::context::Context::from_parameters(params)?
                .decoder()
                .video()
                .map_err(|e| PlayerError::InvalidFormat(format!("视频解码器不可用: {}", e)))?;
            let time_base = rational(stream.time_base());

            streams.push(StreamDescriptor {
                index: stream.index(),
                kind: StreamKind::Video,
                codec: codec_name,
                width: decoder.width(),
                height: decoder.height(),
                frame_rate: rational(stream.avg_frame_rate()),
                sample_rate: 0,
                channels: 0,
                time_base,
            });
            (stream.index(), time_base, decoder)
        };

        if let Some(stream) = input.streams().best(media::Type::Audio) {
            let params = stream.parameters();
            let codec_name = params.id().name().to_string();
            match codec::context::Context::from_parameters(params).and_then(|c| c.decoder().audio()) {
                Ok(audio) => streams.push(StreamDescriptor {
                    index: stream.index(),
                    kind: StreamKind::Audio,
                    codec: codec_name,
                    width: 0,
                    height: 0,
                    frame_rate: 0.0,
                    sample_rate: audio.rate(),
                    channels: audio.channels(),
                    time_base: rational(stream.time_base()),
                }),
                Err(e) => warn!("⚠️ 音频解码器不可用，按无音频处理: {}", e),
            }
        }

        let duration = if input.duration() > 0 {
            input.duration() as f64 / AV_TIME_BASE
        } else {
            0.0
        };

        debug!("流信息: {:?}, 时长 {:.3}s", streams, duration);

        Ok(Self {
            path: path.to_path_buf(),
            input,
            video_index,
            decoder,
            scaler: None,
            time_base,
            streams,
            duration,
            draining: false,
        })
    }

    /// 转换帧格式为 RGBA
    fn convert(&mut self, frame: &util::frame::Video) -> Result<util::frame::Video> {
        let key = (frame.format(), frame.width(), frame.height());
        if self.scaler.as_ref().map_or(true, |(k, _)| *k != key) {
            let context = software::scaling::Context::get(
                key.0,
                key.1,
                key.2,
                util::format::Pixel::RGBA,
                key.1,
                key.2,
                software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| PlayerError::Decode(format!("创建 scaler 失败: {}", e)))?;
            self.scaler = Some((key, context));
        }

        let mut rgba = util::frame::Video::empty();
        if let Some((_, scaler)) = self.scaler.as_mut() {
            scaler
                .run(frame, &mut rgba)
                .map_err(|e| PlayerError::Decode(format!("像素格式转换失败: {}", e)))?;
        }
        Ok(rgba)
    }

    /// 取出解码器中所有可用的帧
    fn receive_frames(&mut self, sink: &mut dyn FnMut(FrameRef<'_>)) -> Result<usize> {
        let mut count = 0;
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let pts = decoded.timestamp().map(|ts| ts as f64 * self.time_base);
                    let rgba = self.convert(&decoded)?;
                    sink(FrameRef {
                        width: rgba.width(),
                        height: rgba.height(),
                        stride: rgba.stride(0),
                        data: rgba.data(0),
                        pts,
                    });
                    count += 1;
                }
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        Ok(count)
    }
}

impl MediaSource for FfmpegSource {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let timestamp = (seconds.max(0.0) * AV_TIME_BASE) as i64;
        self.input
            .seek(timestamp, ..timestamp)
            .map_err(|e| PlayerError::ContainerIo(format!("seek 失败: {}", e)))?;
        self.decoder.flush();
        self.draining = false;
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn decode_next_packet(&mut self, sink: &mut dyn FnMut(FrameRef<'_>)) -> Result<PacketOutcome> {
        if self.draining {
            return Ok(PacketOutcome::EndOfStream);
        }

        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                // 送入 EOF，取出解码器缓冲的最后几帧
                self.draining = true;
                if self.decoder.send_eof().is_ok() {
                    let count = self.receive_frames(sink)?;
                    if count > 0 {
                        return Ok(PacketOutcome::Decoded(count));
                    }
                }
                return Ok(PacketOutcome::EndOfStream);
            }
            Err(e) => return Err(PlayerError::ContainerIo(e.to_string())),
        }

        if packet.stream() != self.video_index {
            return Ok(PacketOutcome::Skipped);
        }

        self.decoder
            .send_packet(&packet)
            .map_err(|e| PlayerError::Decode(e.to_string()))?;
        let count = self.receive_frames(sink)?;
        Ok(PacketOutcome::Decoded(count))
    }

    fn decode_audio(&mut self, sample_rate: u32, channels: u16) -> Result<Option<PcmData>> {
        // 独立的输入上下文，不影响视频的读取位置
        let mut input = open_input(&self.path)?;

        let (index, mut accumulator, mut decoder) = {
            let Some(stream) = input.streams().best(media::Type::Audio) else {
                return Ok(None);
            };
            let decoder = codec::context::Context::from_parameters(stream.parameters())?
                .decoder()
                .audio()?;
            let accumulator = AudioAccumulator::new(sample_rate, channels, rational(stream.time_base()));
            (stream.index(), accumulator, decoder)
        };

        info!("🔊 开始完整解码音频 → {} Hz, {} 声道", sample_rate, channels);

        for (stream, packet) in input.packets() {
            if stream.index() != index {
                continue;
            }
            if let Err(e) = decoder.send_packet(&packet) {
                warn!("音频解码错误（已跳过）: {}", e);
                continue;
            }
            accumulator.drain(&mut decoder)?;
        }

        if decoder.send_eof().is_ok() {
            accumulator.drain(&mut decoder)?;
        }

        let pcm = accumulator.finish()?;
        info!("🔊 音频解码完成: {:.2}s", pcm.duration());
        Ok(Some(pcm))
    }

    fn description(&self) -> String {
        format!("FFmpeg: {}", self.path.display())
    }
}

/// 重采样器末尾一次取出的样本上限
const FLUSH_CHUNK: usize = 4096;

/// 音频解码结果累积器（重采样为交错 f32）
struct AudioAccumulator {
    resampler: Option<software::resampling::Context>,
    target_sample_rate: u32,
    target_channels: u16,
    target_layout: util::channel_layout::ChannelLayout,
    time_base: f64,
    samples: Vec<f32>,
    started: bool,
}

impl AudioAccumulator {
    fn new(target_sample_rate: u32, target_channels: u16, time_base: f64) -> Self {
        Self {
            resampler: None,
            target_sample_rate,
            target_channels: target_channels.max(1),
            target_layout: util::channel_layout::ChannelLayout::default(target_channels.max(1) as i32),
            time_base,
            samples: Vec::new(),
            started: false,
        }
    }

    fn drain(&mut self, decoder: &mut codec::decoder::Audio) -> Result<()> {
        loop {
            let mut frame = util::frame::Audio::empty();
            match decoder.receive_frame(&mut frame) {
                Ok(()) => self.push(&frame)?,
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("音频解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, frame: &util::frame::Audio) -> Result<()> {
        let channels = self.target_channels as usize;

        // 首帧不在 0 时补静音，保证游标和时间轴对齐
        if !self.started {
            self.started = true;
            if let Some(ts) = frame.timestamp() {
                let start = ts as f64 * self.time_base;
                if start > 0.0 {
                    let pad = (start * self.target_sample_rate as f64) as usize * channels;
                    self.samples.resize(pad, 0.0);
                }
            }
        }

        if self.resampler.is_none() {
            let mut source_layout = frame.channel_layout();
            if source_layout.is_empty() {
                source_layout = util::channel_layout::ChannelLayout::default(frame.channels() as i32);
            }

            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                frame.rate(),
                frame.channels(),
                self.target_sample_rate,
                self.target_channels
            );

            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                source_layout,
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                self.target_layout,
                self.target_sample_rate,
            )?);
        }

        // 输出按采样率换算后的容量预先分配，升采样时不会截断
        let capacity = (frame.samples() as u64 * self.target_sample_rate as u64
            / frame.rate().max(1) as u64) as usize
            + 256;
        let mut resampled = self.output_frame(capacity);
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(frame, &mut resampled)?;
        }
        self.append(&resampled);
        Ok(())
    }

    fn output_frame(&self, samples: usize) -> util::frame::Audio {
        util::frame::Audio::new(
            util::format::Sample::F32(util::format::sample::Type::Packed),
            samples,
            self.target_layout,
        )
    }

    fn append(&mut self, resampled: &util::frame::Audio) {
        let count = resampled.samples() * self.target_channels as usize;
        let bytes = resampled.data(0);
        let count = count.min(bytes.len() / 4);
        self.samples.extend(
            bytes[..count * 4]
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
        );
    }

    /// 取出重采样器内部缓存的尾部样本
    fn finish(mut self) -> Result<PcmData> {
        while let Some(resampler) = self.resampler.as_mut() {
            let mut tail = util::frame::Audio::new(
                util::format::Sample::F32(util::format::sample::Type::Packed),
                FLUSH_CHUNK,
                self.target_layout,
            );
            let delay = resampler.flush(&mut tail)?;
            if tail.samples() == 0 {
                break;
            }
            self.append(&tail);
            if delay.is_none() {
                break;
            }
        }

        Ok(PcmData {
            samples: self.samples,
            sample_rate: self.target_sample_rate,
            channels: self.target_channels,
        })
    }
}
