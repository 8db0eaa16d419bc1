use crate::core::{
    Bitmap, DecodedFrame, DriftSample, MasterClock, MediaInfo, PlaybackClock, PlaybackStats,
    PlayerConfig, PlayerError, PlayerEvent, Result, StreamDescriptor, SyncClock, TransportState,
    MAX_RATE, MIN_RATE,
};
use crate::player::audio_engine::AudioEngine;
use crate::player::backend::{AudioDevice, CodecBackend, FrameRef, MediaSource, PacketOutcome};
use crate::player::control::ControlFlags;
use crate::player::events::EventBus;
use crate::player::frame_decode::{
    CodecHandle, DecodeContext, DecodeStats, DecoderSignal, FrameDecoder, SignalHandler,
};
use crate::player::log_ctx;
use crate::player::sync_render::{
    DisplayPoller, DriftHistory, RenderContext, RenderStats, SyncRenderer, SyncThresholds,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// 预览最多读取的数据包数
const PREVIEW_PACKET_LIMIT: usize = 256;

/// 一个已载入文件的全部资源
struct MediaSession {
    path: PathBuf,
    /// 本会话线程的控制信号；会话结束后保持停止状态
    flags: Arc<ControlFlags>,
    codec: CodecHandle,
    video: StreamDescriptor,
    info: MediaInfo,
    audio: Option<AudioEngine>,
    decoder: Option<FrameDecoder>,
    renderer: Option<SyncRenderer>,
    decode_stats: Arc<DecodeStats>,
    render_stats: Arc<RenderStats>,
    /// 预览读取过编解码器，下次播放必须重新 seek
    codec_dirty: bool,
}

/// 传输状态（细粒度锁，UI 高频轮询不会被解码阻塞）
struct TransportInner {
    state: TransportState,
    /// Seeking 结束后回到的状态
    resume_state: TransportState,
    position: f64,
    pending_seek: Option<f64>,
    duration: f64,
    rate: f64,
    volume: f32,
    /// 等待解码线程确认的 seek 代数
    seek_epoch: Option<u64>,
    /// 主时钟停在起播/seek 目标处，等待该代数的首帧
    clock_hold: Option<u64>,
    /// 当前音频引擎的播放标志，放开主时钟时置位
    audio_gate: Option<Arc<AtomicBool>>,
}

struct TransportShared {
    inner: Mutex<TransportInner>,
    events: Arc<EventBus>,
    wall: PlaybackClock,
}

impl TransportShared {
    fn set_state(&self, inner: &mut TransportInner, state: TransportState) {
        if inner.state != state {
            debug!("{} 🎮 状态: {} → {}", log_ctx(), inner.state.as_str(), state.as_str());
            inner.state = state;
            self.events.publish(PlayerEvent::StateChanged(state));
        }
    }

    /// 放开主时钟：音频从游标处出声，墙钟开始计时
    fn start_clock(&self, inner: &mut TransportInner) {
        inner.clock_hold = None;
        if let Some(playing) = &inner.audio_gate {
            playing.store(true, Ordering::SeqCst);
        }
        self.wall.play();
    }

    fn on_seek_resolved(&self, target: f64, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.clock_hold == Some(epoch) {
            if matches!(inner.state, TransportState::Playing | TransportState::Seeking) {
                debug!("{} ⏱️ 首帧就绪，主时钟从 {:.3}s 开始计时", log_ctx(), target);
                self.start_clock(&mut inner);
            } else {
                // 暂停中确认：下次 play() 直接开始计时
                inner.clock_hold = None;
            }
        }
        if inner.seek_epoch != Some(epoch) {
            return;
        }
        inner.seek_epoch = None;
        info!("{} ✅ Seek 完成: {:.3}s", log_ctx(), target);
        self.events.publish(PlayerEvent::Seeked(target));
        if inner.state == TransportState::Seeking {
            let resume = inner.resume_state;
            self.set_state(&mut inner, resume);
        }
    }

    fn fail(&self, message: String) {
        let mut inner = self.inner.lock();
        inner.seek_epoch = None;
        inner.clock_hold = None;
        inner.pending_seek = None;
        self.set_state(&mut inner, TransportState::Idle);
        self.events.publish(PlayerEvent::Error(message));
    }
}

/// 播放管理器 - 整体控制播放流程
///
/// 所有方法都接受 `&self`，可以在任意线程调用。
/// 会话资源由粗粒度锁保护，传输状态由单独的细粒度锁保护。
pub struct PlaybackManager {
    config: PlayerConfig,
    backend: Arc<dyn CodecBackend>,
    audio_device: Arc<dyn AudioDevice>,
    session: Mutex<Option<MediaSession>>,
    transport: Arc<TransportShared>,
    events: Arc<EventBus>,
    /// 跨会话共享的 seek 代数计数器
    epoch: Arc<AtomicU64>,
    clock: SyncClock,
    frame_tx: Sender<DecodedFrame>,
    frame_rx: Receiver<DecodedFrame>,
    display_tx: Sender<DecodedFrame>,
    display_rx: Receiver<DecodedFrame>,
    surface_size: Arc<Mutex<(u32, u32)>>,
    drift: Arc<DriftHistory>,
}

impl PlaybackManager {
    pub fn new(
        config: PlayerConfig,
        backend: Arc<dyn CodecBackend>,
        audio_device: Arc<dyn AudioDevice>,
    ) -> Self {
        info!("{} 🎮 创建播放管理器...", log_ctx());
        let (frame_tx, frame_rx) = bounded(config.frame_queue_capacity);
        let (display_tx, display_rx) = bounded(config.display_queue_capacity);
        let events = Arc::new(EventBus::new());
        let clock = SyncClock::new(PlaybackClock::new());
        let transport = Arc::new(TransportShared {
            inner: Mutex::new(TransportInner {
                state: TransportState::Idle,
                resume_state: TransportState::Playing,
                position: 0.0,
                pending_seek: None,
                duration: 0.0,
                rate: config.rate,
                volume: config.volume,
                seek_epoch: None,
                clock_hold: None,
                audio_gate: None,
            }),
            events: events.clone(),
            wall: clock.wall().clone(),
        });

        let manager = Self {
            surface_size: Arc::new(Mutex::new((config.surface_width, config.surface_height))),
            drift: Arc::new(DriftHistory::new(config.drift_history)),
            config,
            backend,
            audio_device,
            session: Mutex::new(None),
            transport,
            events,
            epoch: Arc::new(AtomicU64::new(0)),
            clock,
            frame_tx,
            frame_rx,
            display_tx,
            display_rx,
        };
        info!("{} ✅ 播放管理器创建完成", log_ctx());
        manager
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// 载入媒体文件：Idle → Loaded，不启动任何线程
    ///
    /// 已有会话时先清理。打开失败返回类型化错误，状态保持 Idle；
    /// 音频设备或音频解码失败只降级为纯视频播放。
    pub fn load(&self, path: impl AsRef<Path>) -> Result<MediaInfo> {
        let path = path.as_ref();
        let mut session = self.session.lock();
        self.teardown(&mut session);

        info!("{} 📂 载入文件: {}", log_ctx(), path.display());
        let mut source = self.backend.open(path).map_err(|e| {
            error!("{} ❌ 打开文件失败: {}", log_ctx(), e);
            e
        })?;
        let video = source.video_stream().cloned().ok_or(PlayerError::NoVideoStream)?;
        let info = source.media_info();
        info!("{} 媒体信息: {:?}", log_ctx(), info);

        let (rate, volume) = {
            let inner = self.transport.inner.lock();
            (inner.rate, inner.volume)
        };
        let audio = self.prepare_audio(source.as_mut(), rate, volume);

        let flags = Arc::new(ControlFlags::with_epoch(self.epoch.clone()));
        self.drain_queues();
        self.drift.clear();
        self.clock.set_audio(audio.as_ref().and_then(|a| a.clock()));
        let wall = self.clock.wall();
        wall.pause();
        wall.set_time(0.0);
        wall.set_rate(rate);

        {
            let mut inner = self.transport.inner.lock();
            inner.position = 0.0;
            inner.pending_seek = None;
            inner.seek_epoch = None;
            inner.clock_hold = None;
            inner.audio_gate = audio.as_ref().map(|a| a.playing_flag());
            inner.duration = info.duration;
            inner.resume_state = TransportState::Playing;
            self.transport.set_state(&mut inner, TransportState::Loaded);
        }

        *session = Some(MediaSession {
            path: path.to_path_buf(),
            flags,
            codec: Arc::new(Mutex::new(source)),
            video,
            info: info.clone(),
            audio,
            decoder: None,
            renderer: None,
            decode_stats: Arc::new(DecodeStats::default()),
            render_stats: Arc::new(RenderStats::default()),
            codec_dirty: false,
        });

        info!("{} ✅ 文件载入完成", log_ctx());
        Ok(info)
    }

    /// 协商音频设备并完整解码音频；失败时降级
    fn prepare_audio(&self, source: &mut dyn MediaSource, rate: f64, volume: f32) -> Option<AudioEngine> {
        let desc = source.audio_stream().cloned()?;
        let pcm = self
            .audio_device
            .negotiate(desc.sample_rate, desc.channels)
            .and_then(|(sample_rate, channels)| {
                debug!("{} 🔊 音频输出配置: {} Hz, {} 声道", log_ctx(), sample_rate, channels);
                source.decode_audio(sample_rate, channels)
            });

        match pcm {
            Ok(Some(pcm)) => {
                let mut engine = AudioEngine::new(self.audio_device.clone());
                engine.load(pcm);
                engine.set_rate(rate);
                engine.set_volume(volume);
                Some(engine)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("{} ⚠️ 音频不可用，降级为纯视频播放: {}", log_ctx(), e);
                self.events.publish(PlayerEvent::AudioDegraded(e.to_string()));
                None
            }
        }
    }

    /// 开始/恢复播放：Loaded/Paused → Playing
    ///
    /// 先让音频就位（设备流静音启动），再启动/唤醒解码线程并确保渲染线程在运行。
    /// 起播或 seek 后主时钟停在目标处，解码线程找到目标帧后才开始计时。
    pub fn play(&self) -> Result<()> {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return Err(PlayerError::InvalidState {
                state: TransportState::Idle.as_str(),
                operation: "play",
            });
        };

        let (pending, start) = {
            let mut inner = self.transport.inner.lock();
            match inner.state {
                TransportState::Playing | TransportState::Seeking => return Ok(()),
                TransportState::Idle => {
                    return Err(PlayerError::InvalidState {
                        state: TransportState::Idle.as_str(),
                        operation: "play",
                    });
                }
                TransportState::Loaded | TransportState::Paused => {}
            }
            let pending = inner.pending_seek.take();
            let start = pending.unwrap_or(inner.position).clamp(0.0, inner.duration.max(0.0));
            (pending, start)
        };

        info!("{} 🎬 播放: 起始位置 {:.3}s", log_ctx(), start);

        // 1. 音频：游标对齐起始位置，设备流先静音运行
        if let Some(audio) = session.audio.as_mut() {
            audio.seek(start);
            if let Err(e) = audio.prime() {
                warn!("{} ⚠️ 音频输出启动失败，降级为纯视频播放: {}", log_ctx(), e);
                session.audio = None;
                self.clock.set_audio(None);
                self.events.publish(PlayerEvent::AudioDegraded(e.to_string()));
            }
        }
        self.clock.wall().set_time(start);

        // 2. 解码：首次启动，或对暂停中的线程补发 seek
        let reseek = pending.is_some() || session.codec_dirty;
        session.codec_dirty = false;
        let decoding = session.decoder.as_ref().map_or(false, |d| d.is_running());
        if !decoding {
            if let Some(mut stale) = session.decoder.take() {
                stale.join(self.config.join_timeout());
            }
            self.drain_queues();
            let ctx = self.decode_context(session);
            session.decoder = Some(FrameDecoder::start(start, ctx));
        } else if reseek {
            self.drain_queues();
        }

        // 3. 渲染
        if !session.renderer.as_ref().map_or(false, |r| r.is_running()) {
            session.renderer = Some(SyncRenderer::start(self.render_context(session)));
        }

        // 4. 主时钟：持锁发起 seek，确认信号不会早于等待状态的记录
        {
            let mut inner = self.transport.inner.lock();
            let (hold, seek_epoch) = if !decoding {
                let epoch = session.flags.epoch();
                (Some(epoch), pending.map(|_| epoch))
            } else if reseek {
                let epoch = session.flags.request_seek(start);
                (Some(epoch), Some(epoch))
            } else {
                // 暂停前未确认的 seek 继续等待
                (inner.clock_hold, inner.seek_epoch)
            };
            inner.clock_hold = hold;
            inner.seek_epoch = seek_epoch;
            inner.audio_gate = session.audio.as_ref().map(|a| a.playing_flag());
            inner.position = start;
            inner.resume_state = TransportState::Playing;
            self.transport.set_state(&mut inner, TransportState::Playing);
            if inner.clock_hold.is_none() {
                self.transport.start_clock(&mut inner);
            }
        }
        session.flags.set_paused(false);
        Ok(())
    }

    /// 暂停：Playing/Seeking → Paused；重复调用不再操作设备
    pub fn pause(&self) -> Result<()> {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return Err(PlayerError::InvalidState {
                state: TransportState::Idle.as_str(),
                operation: "pause",
            });
        };

        // 全程持有传输锁，seek 确认不会在暂停途中重新放开时钟
        let mut inner = self.transport.inner.lock();
        match inner.state {
            TransportState::Playing | TransportState::Seeking => {}
            TransportState::Idle => {
                return Err(PlayerError::InvalidState {
                    state: TransportState::Idle.as_str(),
                    operation: "pause",
                });
            }
            TransportState::Loaded | TransportState::Paused => return Ok(()),
        }

        info!("{} 🎬 暂停", log_ctx());
        session.flags.set_paused(true);
        if let Some(audio) = session.audio.as_mut() {
            audio.pause();
        }
        self.clock.wall().pause();

        inner.position = self.clock.now().clamp(0.0, inner.duration.max(0.0));
        self.transport.set_state(&mut inner, TransportState::Paused);
        Ok(())
    }

    /// 跳转到指定位置（秒），钳制到 `[0, duration]`
    ///
    /// 播放中立即进入 Seeking，主时钟停在目标处，由解码线程找到目标帧后恢复；
    /// 暂停/已载入时只记录目标，下次 `play()` 生效。
    pub fn seek(&self, time: f64) -> Result<()> {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return Err(PlayerError::InvalidState {
                state: TransportState::Idle.as_str(),
                operation: "seek",
            });
        };

        let (state, target) = {
            let inner = self.transport.inner.lock();
            let target = if time.is_nan() {
                0.0
            } else {
                time.clamp(0.0, inner.duration.max(0.0))
            };
            (inner.state, target)
        };

        match state {
            TransportState::Idle => Err(PlayerError::InvalidState {
                state: state.as_str(),
                operation: "seek",
            }),
            TransportState::Loaded | TransportState::Paused => {
                info!("{} 🎯 记录 Seek 目标: {:.3}s（下次播放时生效）", log_ctx(), target);
                let mut inner = self.transport.inner.lock();
                inner.pending_seek = Some(target);
                inner.position = target;
                Ok(())
            }
            TransportState::Playing | TransportState::Seeking => {
                info!("{} 🎯 Seek 到: {:.3}s", log_ctx(), target);

                let drained = self.drain_queues();
                if drained > 0 {
                    debug!("{} 🧹 Seek 清空帧队列: {} 帧", log_ctx(), drained);
                }

                let mut inner = self.transport.inner.lock();
                // 音频静音、墙钟停在目标处，等解码线程找到目标帧
                if let Some(audio) = session.audio.as_ref() {
                    audio.hold();
                    audio.seek(target);
                }
                let wall = self.clock.wall();
                wall.pause();
                wall.set_time(target);

                if inner.state == TransportState::Playing {
                    inner.resume_state = TransportState::Playing;
                }
                inner.position = target;
                inner.pending_seek = None;
                let epoch = session.flags.request_seek(target);
                inner.seek_epoch = Some(epoch);
                inner.clock_hold = Some(epoch);
                self.transport.set_state(&mut inner, TransportState::Seeking);
                Ok(())
            }
        }
    }

    /// 设置播放速率（0.25 - 4.0）
    pub fn set_rate(&self, rate: f64) -> Result<()> {
        if !rate.is_finite() {
            return Err(PlayerError::Config(format!("无效的播放速率: {}", rate)));
        }
        let clamped = rate.clamp(MIN_RATE, MAX_RATE);
        if clamped != rate {
            warn!("{} ⚠️ 播放速率 {} 超出范围，钳制为 {}", log_ctx(), rate, clamped);
        }

        let guard = self.session.lock();
        if let Some(audio) = guard.as_ref().and_then(|s| s.audio.as_ref()) {
            audio.set_rate(clamped);
        }
        self.clock.wall().set_rate(clamped);
        self.transport.inner.lock().rate = clamped;
        info!("{} ⏩ 播放速率: {:.2}x", log_ctx(), clamped);
        Ok(())
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        let guard = self.session.lock();
        if let Some(audio) = guard.as_ref().and_then(|s| s.audio.as_ref()) {
            audio.set_volume(volume);
        }
        self.transport.inner.lock().volume = volume;
    }

    /// 当前播放位置（秒）
    pub fn get_current_time(&self) -> f64 {
        let inner = self.transport.inner.lock();
        match inner.state {
            TransportState::Idle => 0.0,
            TransportState::Loaded | TransportState::Paused => {
                inner.pending_seek.unwrap_or(inner.position)
            }
            TransportState::Playing | TransportState::Seeking => {
                self.clock.now().clamp(0.0, inner.duration.max(0.0))
            }
        }
    }

    pub fn get_duration(&self) -> f64 {
        self.transport.inner.lock().duration
    }

    pub fn is_playing(&self) -> bool {
        let inner = self.transport.inner.lock();
        match inner.state {
            TransportState::Playing => true,
            TransportState::Seeking => inner.resume_state == TransportState::Playing,
            _ => false,
        }
    }

    pub fn state(&self) -> TransportState {
        self.transport.inner.lock().state
    }

    /// 释放会话：任意状态 → Idle，可重复调用
    pub fn cleanup(&self) {
        let mut session = self.session.lock();
        self.teardown(&mut session);
    }

    fn teardown(&self, session: &mut Option<MediaSession>) {
        let Some(mut current) = session.take() else {
            return;
        };
        info!("{} ⏹️  停止播放: {}", log_ctx(), current.path.display());

        current.flags.request_stop();
        if let Some(audio) = current.audio.as_mut() {
            audio.stop();
        }
        self.clock.wall().pause();

        let timeout = self.config.join_timeout();
        if let Some(decoder) = current.decoder.as_mut() {
            decoder.join(timeout);
        }
        if let Some(renderer) = current.renderer.as_mut() {
            renderer.join(timeout);
        }

        let drained = self.drain_queues();
        if drained > 0 {
            debug!("{} 🧹 清空 {} 个残留帧", log_ctx(), drained);
        }
        self.clock.set_audio(None);
        drop(current);

        let mut inner = self.transport.inner.lock();
        inner.position = 0.0;
        inner.pending_seek = None;
        inner.seek_epoch = None;
        inner.clock_hold = None;
        inner.audio_gate = None;
        inner.duration = 0.0;
        self.transport.set_state(&mut inner, TransportState::Idle);
        info!("{} ✅ 会话资源已释放", log_ctx());
    }

    /// 首帧预览：在编解码锁内读取目标位置的第一帧
    ///
    /// 只在未播放时可用；读取会移动解码位置，下次播放会重新 seek。
    pub fn preview_frame(&self, time: f64) -> Result<Bitmap> {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return Err(PlayerError::InvalidState {
                state: TransportState::Idle.as_str(),
                operation: "preview_frame",
            });
        };
        let (state, duration) = {
            let inner = self.transport.inner.lock();
            (inner.state, inner.duration)
        };
        if !matches!(state, TransportState::Loaded | TransportState::Paused) {
            return Err(PlayerError::InvalidState {
                state: state.as_str(),
                operation: "preview_frame",
            });
        }

        let target = time.clamp(0.0, duration.max(0.0));
        session.codec_dirty = true;
        let mut source = session.codec.lock();
        source.seek(target)?;
        source.flush();

        let mut found: Option<Bitmap> = None;
        for _ in 0..PREVIEW_PACKET_LIMIT {
            let outcome = source.decode_next_packet(&mut |frame: FrameRef<'_>| {
                if found.is_none() && frame.pts.map_or(true, |pts| pts >= target - 0.001) {
                    found = Some(frame.to_bitmap());
                }
            });
            match outcome {
                Ok(PacketOutcome::EndOfStream) => break,
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    debug!("{} 预览解码错误（已跳过）: {}", log_ctx(), e);
                }
                Err(e) => return Err(e),
            }
            if found.is_some() {
                break;
            }
        }

        let (width, height) = *self.surface_size.lock();
        found
            .map(|bitmap| bitmap.scale_to_fit(width, height))
            .ok_or_else(|| PlayerError::Decode(format!("{:.3}s 处没有可用的视频帧", target)))
    }

    /// 订阅播放器事件
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// 显示队列的接收端（由显示端自己的节奏消费）
    pub fn display_queue(&self) -> Receiver<DecodedFrame> {
        self.display_rx.clone()
    }

    pub fn display_poller(&self) -> DisplayPoller {
        DisplayPoller::new(self.display_rx.clone(), self.epoch.clone())
    }

    /// 显示区域尺寸变化时调用，之后的帧按新尺寸缩放
    pub fn set_surface_size(&self, width: u32, height: u32) {
        *self.surface_size.lock() = (width.max(1), height.max(1));
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.session.lock().as_ref().map(|s| s.info.clone())
    }

    /// 是否以音频为主时钟
    pub fn has_audio(&self) -> bool {
        self.clock.is_audio_master()
    }

    pub fn stats(&self) -> PlaybackStats {
        let guard = self.session.lock();
        let Some(session) = guard.as_ref() else {
            return PlaybackStats::default();
        };
        let decode = &session.decode_stats;
        let render = &session.render_stats;
        PlaybackStats {
            decoded_frames: decode.decoded.load(Ordering::Relaxed),
            enqueued_frames: decode.enqueued.load(Ordering::Relaxed),
            dropped_frames: decode.dropped.load(Ordering::Relaxed),
            discarded_frames: decode.discarded.load(Ordering::Relaxed),
            presented_frames: render.presented.load(Ordering::Relaxed),
            late_drops: render.late_drops.load(Ordering::Relaxed),
            early_drops: render.early_drops.load(Ordering::Relaxed),
            display_full_drops: render.display_full_drops.load(Ordering::Relaxed),
            stale_drops: render.stale_drops.load(Ordering::Relaxed),
        }
    }

    pub fn drift_history(&self) -> Vec<DriftSample> {
        self.drift.snapshot()
    }

    /// 帧队列当前长度
    pub fn frame_queue_len(&self) -> usize {
        self.frame_rx.len()
    }

    /// 清空帧队列和显示队列，返回丢弃的帧数
    fn drain_queues(&self) -> usize {
        self.frame_rx.try_iter().count() + self.display_rx.try_iter().count()
    }

    fn decode_context(&self, session: &MediaSession) -> DecodeContext {
        let mute = session.audio.as_ref().map(|a| a.playing_flag());
        DecodeContext::from_config(
            &self.config,
            session.codec.clone(),
            session.flags.clone(),
            self.frame_tx.clone(),
            session.decode_stats.clone(),
            session.video.frame_duration(),
            self.signal_handler(session.flags.clone(), mute),
        )
    }

    fn render_context(&self, session: &MediaSession) -> RenderContext {
        RenderContext {
            flags: session.flags.clone(),
            clock: Arc::new(self.clock.clone()),
            frame_rx: self.frame_rx.clone(),
            display_tx: self.display_tx.clone(),
            surface_size: self.surface_size.clone(),
            thresholds: SyncThresholds::from(&self.config),
            poll: self.config.render_poll(),
            stats: session.render_stats.clone(),
            drift: self.drift.clone(),
            events: self.events.clone(),
        }
    }

    /// 解码线程事件处理：seek 确认、文件末尾、不可恢复错误
    fn signal_handler(&self, flags: Arc<ControlFlags>, mute: Option<Arc<AtomicBool>>) -> SignalHandler {
        let transport = self.transport.clone();
        let wall = self.clock.wall().clone();
        Arc::new(move |signal| {
            // 已结束会话的线程（join 超时后被分离）不再影响当前会话
            if flags.should_stop() {
                debug!("{} 忽略已停止会话的解码信号: {:?}", log_ctx(), signal);
                return;
            }
            match signal {
                DecoderSignal::SeekResolved { target, epoch } => {
                    transport.on_seek_resolved(target, epoch)
                }
                DecoderSignal::EndOfStream => transport.events.publish(PlayerEvent::EndOfStream),
                DecoderSignal::Fatal(message) => {
                    error!("{} ❌ 播放因解码错误终止: {}", log_ctx(), message);
                    flags.request_stop();
                    if let Some(playing) = &mute {
                        playing.store(false, Ordering::SeqCst);
                    }
                    wall.pause();
                    transport.fail(message);
                }
            }
        })
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}
