use crate::core::{Bitmap, DecodedFrame, PlayerConfig, PlayerError, Result};
use crate::player::backend::{FrameRef, MediaSource, PacketOutcome};
use crate::player::control::{join_with_timeout, ControlFlags};
use crate::player::log_ctx;
use crossbeam_channel::{SendTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 编解码句柄：解码线程与首帧预览共用，必须串行访问
pub type CodecHandle = Arc<Mutex<Box<dyn MediaSource>>>;

/// 帧队列写入的时间片，每片之间检查暂停/seek/停止
const PUT_SLICE: Duration = Duration::from_millis(50);

/// 时间戳比较容差（秒）
const PTS_EPSILON: f64 = 0.001;

/// 解码线程向传输控制器报告的事件
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderSignal {
    /// 找到 seek 目标处（或之后）的第一帧
    SeekResolved { target: f64, epoch: u64 },
    EndOfStream,
    /// 不可恢复的错误，线程已退出
    Fatal(String),
}

pub type SignalHandler = Arc<dyn Fn(DecoderSignal) + Send + Sync>;

/// 解码统计
#[derive(Debug, Default)]
pub struct DecodeStats {
    pub decoded: AtomicU64,
    pub enqueued: AtomicU64,
    pub dropped: AtomicU64,
    pub discarded: AtomicU64,
    pub decode_errors: AtomicU64,
}

/// 解码线程运行所需的共享资源
#[derive(Clone)]
pub struct DecodeContext {
    pub codec: CodecHandle,
    pub flags: Arc<ControlFlags>,
    pub frame_tx: Sender<DecodedFrame>,
    pub stats: Arc<DecodeStats>,
    pub frame_duration: f64,
    pub put_timeout: Duration,
    pub residue_packets: usize,
    pub seek_sanity: f64,
    pub on_signal: SignalHandler,
}

impl DecodeContext {
    pub fn from_config(
        config: &PlayerConfig,
        codec: CodecHandle,
        flags: Arc<ControlFlags>,
        frame_tx: Sender<DecodedFrame>,
        stats: Arc<DecodeStats>,
        frame_duration: f64,
        on_signal: SignalHandler,
    ) -> Self {
        Self {
            codec,
            flags,
            frame_tx,
            stats,
            frame_duration,
            put_timeout: config.put_timeout(),
            residue_packets: config.residue_packets,
            seek_sanity: config.seek_sanity,
            on_signal,
        }
    }
}

/// 帧解码引擎（每个会话恰好一个解码线程）
pub struct FrameDecoder {
    handle: Option<JoinHandle<()>>,
}

impl FrameDecoder {
    /// 启动解码线程，从 `at_time` 开始
    pub fn start(at_time: f64, ctx: DecodeContext) -> Self {
        let handle = thread::Builder::new()
            .name("video-decode".to_string())
            .spawn(move || DecodeLoop::new(ctx).run(at_time))
            .ok();
        if handle.is_none() {
            error!("{} ❌ 无法创建视频解码线程", log_ctx());
        }
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// 等待线程退出（调用前应先发出停止信号）
    pub fn join(&mut self, timeout: Duration) -> bool {
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, timeout, "视频解码线程"),
            None => true,
        }
    }
}

/// seek 后的帧过滤状态
struct SeekFilter {
    target: f64,
    residue_left: usize,
    resolved: bool,
}

enum Pump {
    Continue,
    Interrupted,
    EndOfStream,
}

enum Push {
    Pushed,
    Interrupted(DecodedFrame),
    TimedOut,
    Disconnected,
}

struct DecodeLoop {
    ctx: DecodeContext,
    epoch: u64,
    next_seq: u64,
    last_pts: f64,
    filter: Option<SeekFilter>,
    backlog: VecDeque<DecodedFrame>,
    eof_reported: bool,
}

impl DecodeLoop {
    fn new(ctx: DecodeContext) -> Self {
        Self {
            epoch: ctx.flags.epoch(),
            ctx,
            next_seq: 0,
            last_pts: 0.0,
            filter: None,
            backlog: VecDeque::new(),
            eof_reported: false,
        }
    }

    fn run(mut self, at_time: f64) {
        info!("{} 🎬 视频解码线程启动: 起始位置 {:.3}s", log_ctx(), at_time);

        let epoch = self.epoch;
        if let Err(e) = self.apply_seek(at_time, epoch) {
            self.fail(e);
            return;
        }

        let flags = self.ctx.flags.clone();
        while !flags.should_stop() {
            if let Some((target, epoch)) = flags.take_seek() {
                if let Err(e) = self.apply_seek(target, epoch) {
                    self.fail(e);
                    return;
                }
                continue;
            }

            if flags.is_paused() {
                flags.wait_while_paused();
                continue;
            }

            match self.pump() {
                Ok(Pump::Continue) | Ok(Pump::Interrupted) => {}
                Ok(Pump::EndOfStream) => {
                    self.on_end_of_stream();
                    flags.wait_for_seek_or_stop();
                }
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }

        info!(
            "{} 🎬 视频解码线程结束: 解码 {} 帧, 入队 {} 帧, 丢弃 {} 帧",
            log_ctx(),
            self.ctx.stats.decoded.load(Ordering::Relaxed),
            self.ctx.stats.enqueued.load(Ordering::Relaxed),
            self.ctx.stats.dropped.load(Ordering::Relaxed)
        );
    }

    /// 粗略 seek 并重置过滤状态
    fn apply_seek(&mut self, target: f64, epoch: u64) -> Result<()> {
        info!("{} ⏩ 解码线程 seek: {:.3}s (epoch {})", log_ctx(), target, epoch);
        {
            let mut codec = self.ctx.codec.lock();
            codec.seek(target)?;
            codec.flush();
        }

        if !self.backlog.is_empty() {
            debug!("{} 🧹 丢弃 {} 个 seek 前的待入队帧", log_ctx(), self.backlog.len());
            self.backlog.clear();
        }
        self.epoch = epoch;
        self.last_pts = target;
        self.eof_reported = false;
        self.filter = Some(SeekFilter {
            target,
            residue_left: self.ctx.residue_packets,
            resolved: false,
        });
        Ok(())
    }

    /// 处理一个数据包：解码、立即转换、入队
    fn pump(&mut self) -> Result<Pump> {
        if !self.flush_backlog() {
            return Ok(Pump::Interrupted);
        }

        let flags = self.ctx.flags.clone();
        let mut converted: Vec<(Bitmap, Option<f64>)> = Vec::new();
        let outcome = {
            let mut codec = self.ctx.codec.lock();
            codec.decode_next_packet(&mut |frame: FrameRef<'_>| {
                // 帧对象在后端推进后失效，必须在回调内拷贝；暂停时照常保留
                if !flags.seek_pending() && !flags.should_stop() {
                    converted.push((frame.to_bitmap(), frame.pts));
                }
            })
        };

        match outcome {
            Ok(PacketOutcome::EndOfStream) => return Ok(Pump::EndOfStream),
            Ok(PacketOutcome::Skipped) => return Ok(Pump::Continue),
            Ok(PacketOutcome::Decoded(_)) => {}
            Err(e) if e.is_transient() => {
                self.ctx.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("{} 解码错误（已跳过）: {}", log_ctx(), e);
                return Ok(Pump::Continue);
            }
            Err(e) => return Err(e),
        }

        if let Some(filter) = self.filter.as_mut() {
            filter.residue_left = filter.residue_left.saturating_sub(1);
        }

        for (bitmap, pts) in converted {
            let pts = pts.unwrap_or(self.last_pts + self.ctx.frame_duration);
            self.last_pts = pts;
            self.ctx.stats.decoded.fetch_add(1, Ordering::Relaxed);

            if !self.accept(pts) {
                self.ctx.stats.discarded.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            self.backlog.push_back(DecodedFrame {
                bitmap,
                pts,
                seq: self.next_seq,
                epoch: self.epoch,
            });
            self.next_seq += 1;
        }

        if self.flush_backlog() {
            Ok(Pump::Continue)
        } else {
            Ok(Pump::Interrupted)
        }
    }

    /// seek 过滤：丢弃目标之前的帧和解码器残留帧
    fn accept(&mut self, pts: f64) -> bool {
        let Some(filter) = self.filter.as_mut() else {
            return true;
        };

        if filter.residue_left > 0 && pts > filter.target + self.ctx.seek_sanity {
            debug!("{} 🎬 丢弃解码器残留帧: PTS={:.3}s", log_ctx(), pts);
            return false;
        }
        if pts < filter.target - PTS_EPSILON {
            return false;
        }

        if !filter.resolved {
            filter.resolved = true;
            info!(
                "{} 🎬 找到 seek 后首个有效视频帧: PTS={:.3}s (目标={:.3}s)",
                log_ctx(),
                pts,
                filter.target
            );
            (self.ctx.on_signal)(DecoderSignal::SeekResolved {
                target: filter.target,
                epoch: self.epoch,
            });
        }
        if filter.residue_left == 0 {
            self.filter = None;
        }
        true
    }

    /// 推送积压帧；被打断时返回 false（剩余帧保留到恢复后）
    fn flush_backlog(&mut self) -> bool {
        while let Some(frame) = self.backlog.pop_front() {
            match self.push(frame) {
                Push::Pushed => {
                    self.ctx.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                }
                Push::TimedOut => {
                    let dropped = self.ctx.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!("{} 🎬 帧队列写入超时，丢弃 (累计 {})", log_ctx(), dropped);
                }
                Push::Interrupted(frame) => {
                    self.backlog.push_front(frame);
                    return false;
                }
                Push::Disconnected => {
                    self.backlog.clear();
                    return false;
                }
            }
        }
        true
    }

    /// 阻塞写入帧队列（背压），按时间片检查控制信号
    fn push(&self, frame: DecodedFrame) -> Push {
        let deadline = Instant::now() + self.ctx.put_timeout;
        let mut frame = frame;
        loop {
            if self.ctx.flags.interrupted() {
                return Push::Interrupted(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return Push::TimedOut;
            }
            let slice = PUT_SLICE.min(deadline - now);
            match self.ctx.frame_tx.send_timeout(frame, slice) {
                Ok(()) => return Push::Pushed,
                Err(SendTimeoutError::Timeout(back)) => frame = back,
                Err(SendTimeoutError::Disconnected(_)) => return Push::Disconnected,
            }
        }
    }

    fn on_end_of_stream(&mut self) {
        // seek 到末尾之后没有任何帧，也要结束 Seeking
        if let Some(filter) = self.filter.take() {
            if !filter.resolved {
                (self.ctx.on_signal)(DecoderSignal::SeekResolved {
                    target: filter.target,
                    epoch: self.epoch,
                });
            }
        }
        if !self.eof_reported {
            self.eof_reported = true;
            info!("{} 🎬 视频解码到达文件末尾", log_ctx());
            (self.ctx.on_signal)(DecoderSignal::EndOfStream);
        }
    }

    fn fail(&mut self, e: PlayerError) {
        error!("{} ❌ 视频解码线程遇到不可恢复错误: {}", log_ctx(), e);
        self.backlog.clear();
        (self.ctx.on_signal)(DecoderSignal::Fatal(e.to_string()));
    }
}
